use gradebox::config::{Config, ConfigError};

use super::fixture_path;

#[test]
fn test_load_valid_config() {
    let config = Config::from_file(fixture_path("configs/valid_full.toml"))
        .expect("Failed to load config");

    assert_eq!(config.default_image, "cpp");
    assert!(config.images.contains_key("python3"));
    assert_eq!(config.images["python3"].mounts.len(), 1);
    assert_eq!(config.box_pool.start_id, 100);
    assert_eq!(config.box_pool.count, 8);
    assert_eq!(config.default_limits.wall_time_limit, Some(20.0));
    assert_eq!(config.grading.max_retries, 5);
    assert_eq!(config.grading.retry_delay_ms, 250);
    assert_eq!(config.grading.combined_log_ceiling, 131072);
    assert_eq!(config.grading.workers, 2);
}

#[test]
fn test_load_minimal_config() {
    let config = Config::from_file(fixture_path("configs/valid_minimal.toml"))
        .expect("Failed to load config");

    assert_eq!(config.default_image, "default");
    assert!(config.get_image("default").is_ok());
    assert_eq!(config.grading.output_ceiling, 8 * 1024 * 1024);
}

#[test]
fn test_load_invalid_missing_default_image() {
    let result = Config::from_file(fixture_path("configs/invalid_missing_default_image.toml"));
    assert!(matches!(result, Err(ConfigError::ImageNotFound(tag)) if tag == "java"));
}

#[test]
fn test_load_invalid_zero_workers() {
    let result = Config::from_file(fixture_path("configs/invalid_zero_workers.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_empty_image_path() {
    let result = Config::from_file(fixture_path("configs/invalid_empty_image_path.toml"));
    assert!(result.is_err());
}

#[test]
fn test_example_config_parses() {
    let config = Config::parse_toml(gradebox::EXAMPLE_CONFIG).expect("example config is valid");
    assert!(config.images.contains_key(&config.default_image));
}
