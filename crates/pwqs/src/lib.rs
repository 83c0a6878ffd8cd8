//! Writing pw.x inputs, scraping pw.x outputs, and submitting the runs to a
//! queuing system

use std::sync::LazyLock;

pub mod program;
pub mod queue;

/// Whether or not the environment variable `PWQS_NO_RETRY` has been set. If
/// it has, a failed submission is reported immediately instead of retried
static NO_RETRY: LazyLock<bool> =
    LazyLock::new(|| std::env::var("PWQS_NO_RETRY").is_ok());
