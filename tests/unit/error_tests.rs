//! Unit tests for error display and conversions.

use threadkeeper::errors::AppError;

#[test]
fn display_prefixes_each_variant() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Db("broken".into()).to_string(), "db: broken");
    assert_eq!(AppError::Slack("denied".into()).to_string(), "slack: denied");
    assert_eq!(
        AppError::Classify("weird shape".into()).to_string(),
        "classify: weird shape"
    );
    assert_eq!(
        AppError::NotFound("request x".into()).to_string(),
        "not found: request x"
    );
    assert_eq!(
        AppError::AlreadyExists("reply y".into()).to_string(),
        "already exists: reply y"
    );
    assert_eq!(AppError::Io("port taken".into()).to_string(), "io: port taken");
}

#[test]
fn toml_errors_map_to_config() {
    let err: AppError = toml::from_str::<toml::Value>("= broken").unwrap_err().into();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn serde_json_errors_map_to_db() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{oops")
        .unwrap_err()
        .into();
    assert!(matches!(err, AppError::Db(_)));
    assert!(err.to_string().contains("invalid stored json"));
}

#[test]
fn sqlx_errors_map_to_db() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));
}

#[test]
fn errors_implement_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Db("x".into()));
}
