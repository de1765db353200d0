//! Skips mock-server tests where localhost sockets cannot be bound.
//!
//! Also compiled into the integration tests through `tests/support`.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

#[must_use]
pub fn socket_tests_required() -> bool {
    std::env::var("BOOKSHELF_REQUIRE_SOCKET_TESTS")
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

#[track_caller]
#[must_use]
pub fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind localhost socket at {}:{}; mock transfer server cannot start",
        location.file(),
        location.line()
    );
    assert!(
        !socket_tests_required(),
        "{message}. Set BOOKSHELF_REQUIRE_SOCKET_TESTS=0 to allow skipping."
    );

    eprintln!("{message}. Skipping test. Set BOOKSHELF_REQUIRE_SOCKET_TESTS=1 to fail instead.");
    true
}

pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if should_skip_socket_bound_test() {
        None
    } else {
        Some(MockServer::start().await)
    }
}
