use crate::config::CONFIG;
use crate::store::Deadline;

/// Deadline for one request, counted from now.
pub(crate) fn request_deadline() -> Deadline {
    Deadline::after(CONFIG.op_timeout)
}

#[cfg(test)]
pub(crate) fn setup_test_env() {
    use std::path::Path;
    use std::sync::Once;

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        if Path::new(".env").is_file() {
            dotenv::dotenv().expect("failed to initialize dotenv");
        }
    });
}
