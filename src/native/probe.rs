//! Capability probe.

use super::loader::LOADER_AVAILABLE;
use super::toolchain::NativeToolchain;

/// Whether this build was compiled with inline execution.
pub const FEATURE_ENABLED: bool = cfg!(feature = "native");

/// True when the build has the feature, the platform can load shared
/// objects, and `toolchain` answers.
///
/// Not memoized; callers cache the answer (see [`super::supported`]).
pub fn host_supports<T: NativeToolchain + ?Sized>(toolchain: &T) -> bool {
    FEATURE_ENABLED && LOADER_AVAILABLE && toolchain.is_available()
}
