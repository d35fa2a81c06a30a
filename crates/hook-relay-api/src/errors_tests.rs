use super::*;

#[test]
fn test_exit_codes_distinguish_startup_failures() {
    let bind = ServiceError::BindFailed {
        address: "0.0.0.0:4567".to_string(),
        message: "address in use".to_string(),
    };
    let serve = ServiceError::ServerFailed {
        message: "accept failed".to_string(),
    };
    let config = ServiceError::from(ConfigError::Missing {
        key: "github.app_id".to_string(),
    });

    assert_eq!(bind.exit_code(), 1);
    assert_eq!(serve.exit_code(), 2);
    assert_eq!(config.exit_code(), 3);
}

#[test]
fn test_credential_errors_are_configuration_failures() {
    let error = ServiceError::from(ConfigError::from(AuthError::InvalidPrivateKey {
        message: "not a key".to_string(),
    }));

    assert!(matches!(
        error,
        ServiceError::Configuration(ConfigError::Credentials(_))
    ));
    assert!(error.to_string().contains("not a key"));
}

#[test]
fn test_forbidden_response_leaks_no_detail() {
    let response = RelayHandlerError::Forbidden.into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
