//! Log-once primitive used for soft feature-negotiation notices.

/// Log a message through the `log` facade at most once per call site.
///
/// Every expansion owns its own `Once`, so two different call sites with the
/// same text each log once; a call site inside a loop logs only on the first
/// iteration.
///
/// ```
/// for _ in 0..3 {
///     nbest::log_once!(log::Level::Info, "printed a single time");
/// }
/// ```
#[macro_export]
macro_rules! log_once {
    ($lvl:expr, $($arg:tt)+) => {{
        static ONCE: ::std::sync::Once = ::std::sync::Once::new();
        ONCE.call_once(|| $crate::__log::log!($lvl, $($arg)+));
    }};
}
