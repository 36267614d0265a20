//! Helpers shared by the stream plumbing.

use std::thread::JoinHandle;

use anyhow::{Error, bail};

/// Join a worker thread, converting a panic into an error carrying the
/// panic message.
pub fn join_worker(worker: JoinHandle<()>) -> Result<(), Error> {
    match worker.join() {
        Ok(()) => Ok(()),
        Err(panic) => {
            let msg = match (
                panic.downcast_ref::<&str>(),
                panic.downcast_ref::<String>(),
            ) {
                (Some(&s), _) => s,
                (_, Some(s)) => s.as_str(),
                (None, None) => "<no panic message>",
            };
            bail!("Filter worker panic: {msg}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panicking_worker_reported_as_error() {
        let worker = std::thread::spawn(|| panic!("boom"));
        let error = join_worker(worker).unwrap_err();
        assert!(error.to_string().contains("boom"));
    }

    #[test]
    fn clean_worker_joins_ok() {
        let worker = std::thread::spawn(|| ());
        assert!(join_worker(worker).is_ok());
    }
}
