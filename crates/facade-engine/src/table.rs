//! The VeriFace function table: raw symbol types and resolution.
//!
//! Calling conventions, per the vendor SDK reference:
//! - Status-returning entries report 1 on success; any other value is an
//!   opaque failure code.
//! - Regions cross the boundary as four consecutive ints per face:
//!   left, top, width, height.
//! - `extractFeatures` and `scoreQuality` write into caller-sized buffers.
//!   `detectAndExtract` allocates its own output buffers, and each one must
//!   be handed back to `releaseBuffer` exactly once.

use libc::{c_char, c_int, c_void};
use libloading::Library;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Success status for every status-returning engine call.
pub(crate) const ENGINE_OK: c_int = 1;

/// Smallest face edge, in pixels, the engine can detect. An engine-side
/// constant; the service reports it to clients but never enforces it.
pub const MIN_FACE_SIZE: u32 = 80;

/// Ints per region in the flat wire layout: left, top, width, height.
pub(crate) const REGION_FIELDS: usize = 4;

pub(crate) type InitFn =
    unsafe extern "C" fn(model_dir: *const c_char, log_path: *const c_char) -> c_int;

pub(crate) type ExtractFeaturesFn = unsafe extern "C" fn(
    image: *const u8,
    image_len: c_int,
    regions: *const c_int,
    region_count: c_int,
    features: *mut f32,
) -> c_int;

pub(crate) type DetectAndExtractFn = unsafe extern "C" fn(
    image: *const u8,
    image_len: c_int,
    regions: *mut *mut c_int,
    region_count: *mut c_int,
    features: *mut *mut f32,
    feature_len: *mut c_int,
) -> c_int;

pub(crate) type ScoreQualityFn = unsafe extern "C" fn(
    image: *const u8,
    image_len: c_int,
    regions: *const c_int,
    region_count: c_int,
    quality: *mut c_int,
    pose: *mut f32,
) -> c_int;

pub(crate) type CompareFeaturesFn =
    unsafe extern "C" fn(a: *const f32, len_a: c_int, b: *const f32, len_b: c_int) -> f32;

pub(crate) type ReleaseBufferFn = unsafe extern "C" fn(buf: *mut c_void);

pub(crate) type ReleaseFn = unsafe extern "C" fn();

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load engine library {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("engine library is missing symbol {symbol}: {source}")]
    Symbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("path {} contains a NUL byte and cannot cross the C boundary", .0.display())]
    BadPath(PathBuf),
    #[error("engine initialization failed with status {0}")]
    InitFailed(i32),
}

/// Resolved VeriFace entry points.
///
/// Holds the `Library` alongside the raw pointers so the mapped object
/// stays alive as long as any pointer can be called. Tests build tables
/// from bare function pointers instead, with no library behind them.
#[derive(Debug)]
pub(crate) struct EngineTable {
    pub(crate) init: InitFn,
    pub(crate) extract_features: ExtractFeaturesFn,
    pub(crate) detect_and_extract: DetectAndExtractFn,
    pub(crate) score_quality: ScoreQualityFn,
    pub(crate) compare_features: CompareFeaturesFn,
    pub(crate) release_buffer: ReleaseBufferFn,
    pub(crate) release: ReleaseFn,
    _library: Option<Library>,
}

impl EngineTable {
    /// dlopen the engine library and resolve the full table up front, so a
    /// missing entry point fails the load instead of the first call.
    pub(crate) fn load(path: &Path) -> Result<Self, LoadError> {
        // SAFETY: loading a shared object runs its constructors; that is
        // inherent to dlopen and part of trusting the vendor library at all.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: each symbol is resolved against the signature published in
        // the vendor header for exactly that name.
        unsafe {
            Ok(Self {
                init: resolve(&library, "VeriFace_init")?,
                extract_features: resolve(&library, "VeriFace_extractFeatures")?,
                detect_and_extract: resolve(&library, "VeriFace_detectAndExtract")?,
                score_quality: resolve(&library, "VeriFace_scoreQuality")?,
                compare_features: resolve(&library, "VeriFace_compareFeatures")?,
                release_buffer: resolve(&library, "VeriFace_releaseBuffer")?,
                release: resolve(&library, "VeriFace_release")?,
                _library: Some(library),
            })
        }
    }

    /// Assemble a table from raw entry points, bypassing dlopen.
    #[cfg(test)]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_raw(
        init: InitFn,
        extract_features: ExtractFeaturesFn,
        detect_and_extract: DetectAndExtractFn,
        score_quality: ScoreQualityFn,
        compare_features: CompareFeaturesFn,
        release_buffer: ReleaseBufferFn,
        release: ReleaseFn,
    ) -> Self {
        Self {
            init,
            extract_features,
            detect_and_extract,
            score_quality,
            compare_features,
            release_buffer,
            release,
            _library: None,
        }
    }
}

/// Resolve one symbol and copy its function pointer out of the library.
///
/// # Safety
///
/// `T` must be the true C signature of `symbol`; a mismatch is undefined
/// behavior at the first call.
unsafe fn resolve<T: Copy>(library: &Library, symbol: &'static str) -> Result<T, LoadError> {
    // SAFETY: deferred to the caller's signature guarantee.
    let resolved = unsafe { library.get::<T>(symbol.as_bytes()) }
        .map_err(|source| LoadError::Symbol { symbol, source })?;
    Ok(*resolved)
}
