use agent_relay::AppError;

#[test]
fn display_prefixes_each_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Protocol("eof".into()), "protocol: eof"),
        (AppError::ConnectTimeout("slow".into()), "connect timeout: slow"),
        (AppError::Aborted("turn".into()), "aborted: turn"),
        (AppError::Spawn("missing".into()), "spawn: missing"),
        (AppError::NotFound("session".into()), "not found: session"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn only_aborted_is_the_abort_class() {
    assert!(AppError::Aborted("x".into()).is_aborted());
    assert!(!AppError::Protocol("x".into()).is_aborted());
    assert!(!AppError::ConnectTimeout("x".into()).is_aborted());
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("gone")));
}

#[test]
fn toml_error_converts_to_config() {
    let parse = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err: AppError = parse.into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}
