//! Logging, contingent on the `defmt` feature
//!
//! The macros expand to nothing unless `defmt` is enabled, so the class can be
//! built for targets without a global logger.

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($args)*)
    };
}

macro_rules! info {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt")]
        ::defmt::info!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($args)*)
    };
}

macro_rules! error {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt")]
        ::defmt::error!($($args)*)
    };
}
