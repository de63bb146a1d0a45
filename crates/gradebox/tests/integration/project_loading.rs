use gradebox::model::{ExpectedOutput, Project, StdinSource, UnitKind};

use super::fixture_path;

#[test]
fn test_load_project_and_files() {
    let project = Project::from_file(fixture_path("projects/echo/project.toml"))
        .expect("Failed to load project");
    assert_eq!(project.id, "echo");
    assert_eq!(project.units.len(), 2);

    let UnitKind::TestCase(spec) = &project.units[0].kind else {
        panic!("expected a test case");
    };
    assert_eq!(spec.stdin, StdinSource::InstructorFile("input.txt".into()));
    assert_eq!(
        spec.expected_stdout,
        ExpectedOutput::InstructorFile("expected.txt".into())
    );
    assert!(project.units[1].deferred);

    // paths resolve against the project file's directory
    let files = project.load_files().expect("Failed to read project files");
    let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["expected.txt", "input.txt"]);
    assert_eq!(files[1].content, b"hello gradebox\n");
}
