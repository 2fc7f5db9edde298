#[cfg(feature = "napi")]
use napi_derive::napi;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("classfile_compiler=debug,info")
        } else {
            EnvFilter::new("classfile_compiler=info")
        }
    })
}

/// Installs the global subscriber. Returns false if one was already set.
pub fn init_logger(verbose: bool) -> bool {
    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .is_ok()
}

/// JSON lines, for hosts that collect structured logs.
pub fn init_json_logger() -> bool {
    tracing_subscriber::registry()
        .with(default_filter(false))
        .with(tracing_subscriber::fmt::layer().with_target(false).json())
        .try_init()
        .is_ok()
}

#[cfg(feature = "napi")]
#[napi]
pub fn init_logging_native(verbose: bool, json: bool) -> bool {
    if json {
        init_json_logger()
    } else {
        init_logger(verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        init_logger(true);
        assert!(!init_logger(false));
        assert!(!init_json_logger());
    }
}
