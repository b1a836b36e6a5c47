use super::error::Error;
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // try_init underneath, so repeated calls must not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level("trace"), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("loud"), tracing::Level::INFO);
}

#[test]
fn transport_errors_are_grouped() {
    assert!(Error::ClosedConnection.is_transport());
    assert!(Error::Io(std::io::Error::other("boom")).is_transport());
    assert!(!Error::NotConnected.is_transport());
    assert!(!Error::Timeout.is_transport());
    assert!(!Error::InvalidMessage("missing action").is_transport());
}
