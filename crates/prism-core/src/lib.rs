// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing::error;

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// One line per cause, outermost first.
pub fn error_chain_lines(err: &anyhow::Error) -> Vec<String> {
    err.chain()
        .enumerate()
        .map(|(depth, cause)| {
            if depth == 0 {
                cause.to_string()
            } else {
                format!("{:>width$}caused by: {cause}", "", width = depth * 2)
            }
        })
        .collect()
}

pub fn log_error_chain(err: &anyhow::Error) {
    for line in error_chain_lines(err) {
        error!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn chain_lists_every_cause_outermost_first() {
        let err = Err::<(), _>(anyhow::anyhow!("No suitable physical device found"))
            .context("Select physical device failed")
            .context("Create renderer failed")
            .unwrap_err();

        let lines = error_chain_lines(&err);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Create renderer failed");
        assert_eq!(lines[1], "  caused by: Select physical device failed");
        assert_eq!(lines[2], "    caused by: No suitable physical device found");
    }

    #[test]
    fn init_is_idempotent() {
        init_tracing("info");
        init_tracing("debug");
    }
}
