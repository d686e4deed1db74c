//! Safe wrapper over the VeriFace table.

use crate::buffers::EngineBuf;
use crate::table::{EngineTable, LoadError, ENGINE_OK, REGION_FIELDS};
use facade_core::{CropScore, EngineError, FeatureVector, RecognitionEngine, Region, FEATURE_LEN};
use libc::c_int;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

// Call names as they appear in errors and logs.
const CALL_EXTRACT: &str = "extractFeatures";
const CALL_DETECT: &str = "detectAndExtract";
const CALL_SCORE: &str = "scoreQuality";
const CALL_COMPARE: &str = "compareFeatures";

/// The initialized native engine.
///
/// Construction runs `VeriFace_init` once; `Drop` runs `VeriFace_release`
/// once. The daemon builds exactly one of these and moves it onto the
/// pipeline worker thread, which serializes every call.
#[derive(Debug)]
pub struct NativeEngine {
    table: EngineTable,
}

impl NativeEngine {
    /// Load the engine library, resolve its symbols, and initialize it
    /// against the model directory, with an optional engine-side log file.
    pub fn load(
        library: &Path,
        model_dir: &Path,
        engine_log: Option<&Path>,
    ) -> Result<Self, LoadError> {
        let table = EngineTable::load(library)?;
        let engine = Self::with_table(table, model_dir, engine_log)?;
        tracing::info!(
            library = %library.display(),
            model_dir = %model_dir.display(),
            "recognition engine initialized"
        );
        Ok(engine)
    }

    /// Initialize over an already-resolved table.
    fn with_table(
        table: EngineTable,
        model_dir: &Path,
        engine_log: Option<&Path>,
    ) -> Result<Self, LoadError> {
        let model_dir = path_to_cstring(model_dir)?;
        let engine_log = engine_log.map(path_to_cstring).transpose()?;
        let log_ptr = engine_log.as_ref().map_or(ptr::null(), |log| log.as_ptr());

        // SAFETY: both arguments are NUL-terminated strings alive across the
        // call; a null log path means "no engine log", which init accepts.
        let status = unsafe { (table.init)(model_dir.as_ptr(), log_ptr) };
        if status != ENGINE_OK {
            return Err(LoadError::InitFailed(status));
        }
        Ok(Self { table })
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        // SAFETY: init succeeded when self was constructed, and release runs
        // exactly once, here.
        unsafe { (self.table.release)() };
        tracing::info!("recognition engine released");
    }
}

impl RecognitionEngine for NativeEngine {
    fn extract_features(
        &mut self,
        image: &[u8],
        regions: &[Region],
    ) -> Result<Vec<FeatureVector>, EngineError> {
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        debug_assert!(!image.is_empty(), "callers validate images first");

        let flat = flatten_regions(regions);
        let mut features = vec![0.0f32; regions.len() * FEATURE_LEN];
        // SAFETY: `flat` holds REGION_FIELDS ints per region and `features`
        // is sized to region_count * FEATURE_LEN floats, which is this
        // call's fixed-output contract.
        let status = unsafe {
            (self.table.extract_features)(
                image.as_ptr(),
                image.len() as c_int,
                flat.as_ptr(),
                regions.len() as c_int,
                features.as_mut_ptr(),
            )
        };
        if status != ENGINE_OK {
            return Err(EngineError::CallFailed {
                call: CALL_EXTRACT,
                code: status,
            });
        }
        split_features(&features, CALL_EXTRACT)
    }

    fn detect_and_extract(
        &mut self,
        image: &[u8],
    ) -> Result<Vec<(Region, FeatureVector)>, EngineError> {
        debug_assert!(!image.is_empty(), "callers validate images first");

        let mut regions_ptr: *mut c_int = ptr::null_mut();
        let mut region_count: c_int = 0;
        let mut features_ptr: *mut f32 = ptr::null_mut();
        let mut feature_len: c_int = 0;

        // SAFETY: the out-pointers reference live locals; the engine writes
        // its buffer addresses and element counts through them.
        let status = unsafe {
            (self.table.detect_and_extract)(
                image.as_ptr(),
                image.len() as c_int,
                &mut regions_ptr,
                &mut region_count,
                &mut features_ptr,
                &mut feature_len,
            )
        };

        // Adopt both buffers before looking at the status: whatever the
        // engine allocated must be released on every path out of here.
        let count = usize::try_from(region_count).unwrap_or(0);
        let flen = usize::try_from(feature_len).unwrap_or(0);
        // SAFETY: on return the engine has either left each pointer null or
        // set it to a buffer it allocated, sized region_count * 4 ints and
        // feature_len floats respectively. Ownership transfers to us.
        let regions_buf =
            unsafe { EngineBuf::adopt(regions_ptr, count * REGION_FIELDS, self.table.release_buffer) };
        let features_buf =
            unsafe { EngineBuf::adopt(features_ptr, flen, self.table.release_buffer) };

        if status != ENGINE_OK {
            return Err(EngineError::CallFailed {
                call: CALL_DETECT,
                code: status,
            });
        }
        if region_count < 0 || feature_len < 0 {
            return Err(EngineError::MalformedOutput {
                call: CALL_DETECT,
                what: format!("negative output sizes ({region_count}, {feature_len})"),
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let regions_buf = regions_buf.ok_or_else(|| EngineError::MalformedOutput {
            call: CALL_DETECT,
            what: format!("null region buffer for {count} faces"),
        })?;
        let features_buf = features_buf.ok_or_else(|| EngineError::MalformedOutput {
            call: CALL_DETECT,
            what: format!("null feature buffer for {count} faces"),
        })?;
        if flen != count * FEATURE_LEN {
            return Err(EngineError::MalformedOutput {
                call: CALL_DETECT,
                what: format!(
                    "feature buffer holds {flen} floats for {count} faces, expected {}",
                    count * FEATURE_LEN
                ),
            });
        }

        let regions: Vec<Region> = regions_buf
            .as_slice()
            .chunks_exact(REGION_FIELDS)
            .map(region_from_flat)
            .collect();
        let features = split_features(features_buf.as_slice(), CALL_DETECT)?;
        tracing::debug!(count, "engine detected faces");
        Ok(regions.into_iter().zip(features).collect())
    }

    fn score_quality(
        &mut self,
        image: &[u8],
        regions: &[Region],
    ) -> Result<Vec<CropScore>, EngineError> {
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        debug_assert!(!image.is_empty(), "callers validate images first");

        let flat = flatten_regions(regions);
        let mut quality: Vec<c_int> = vec![0; regions.len()];
        let mut pose: Vec<f32> = vec![0.0; regions.len()];
        // SAFETY: quality and pose are caller-sized to one slot per region,
        // which is this call's fixed-output contract.
        let status = unsafe {
            (self.table.score_quality)(
                image.as_ptr(),
                image.len() as c_int,
                flat.as_ptr(),
                regions.len() as c_int,
                quality.as_mut_ptr(),
                pose.as_mut_ptr(),
            )
        };
        if status != ENGINE_OK {
            return Err(EngineError::CallFailed {
                call: CALL_SCORE,
                code: status,
            });
        }
        Ok(quality
            .into_iter()
            .zip(pose)
            .map(|(quality, pose)| CropScore { quality, pose })
            .collect())
    }

    fn compare_features(
        &mut self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<f32, EngineError> {
        // SAFETY: both slices hold FEATURE_LEN floats and the engine only
        // reads them.
        let similarity = unsafe {
            (self.table.compare_features)(
                a.as_slice().as_ptr(),
                a.as_slice().len() as c_int,
                b.as_slice().as_ptr(),
                b.as_slice().len() as c_int,
            )
        };
        if !similarity.is_finite() {
            return Err(EngineError::MalformedOutput {
                call: CALL_COMPARE,
                what: format!("non-finite similarity {similarity}"),
            });
        }
        Ok(similarity.clamp(0.0, 1.0))
    }
}

/// Flatten regions into the engine's wire layout.
fn flatten_regions(regions: &[Region]) -> Vec<c_int> {
    let mut flat = Vec::with_capacity(regions.len() * REGION_FIELDS);
    for region in regions {
        flat.extend_from_slice(&[region.left, region.top, region.width, region.height]);
    }
    flat
}

fn region_from_flat(chunk: &[c_int]) -> Region {
    Region {
        left: chunk[0],
        top: chunk[1],
        width: chunk[2],
        height: chunk[3],
    }
}

/// Split a flat feature buffer into validated per-face vectors, one copy
/// per face.
fn split_features(raw: &[f32], call: &'static str) -> Result<Vec<FeatureVector>, EngineError> {
    raw.chunks_exact(FEATURE_LEN)
        .map(|chunk| {
            FeatureVector::new(chunk.to_vec()).map_err(|e| EngineError::MalformedOutput {
                call,
                what: e.to_string(),
            })
        })
        .collect()
}

fn path_to_cstring(path: &Path) -> Result<CString, LoadError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| LoadError::BadPath(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libc::{c_char, c_void};
    use std::cell::RefCell;

    /// Instrumented stand-in for the vendor library.
    ///
    /// State is thread-local because the extern fns have no other channel
    /// back to the test; engine calls happen on the calling thread, so each
    /// test sees only its own state.
    #[derive(Default)]
    struct FakeState {
        init_status: c_int,
        detect_status: c_int,
        extract_status: c_int,
        score_status: c_int,
        compare_result: f32,
        init_calls: usize,
        release_calls: usize,
        native_calls: usize,
        buffers_allocated: usize,
        buffers_released: usize,
        live_buffers: isize,
        /// Allocate output buffers even when detect reports failure, like an
        /// engine that fails after partially producing output.
        alloc_on_failure: bool,
        faces: Vec<[c_int; 4]>,
        feature_len_override: Option<c_int>,
        scores: Vec<(c_int, f32)>,
        last_flat_regions: Vec<c_int>,
    }

    impl FakeState {
        fn fresh() -> Self {
            Self {
                init_status: ENGINE_OK,
                detect_status: ENGINE_OK,
                extract_status: ENGINE_OK,
                score_status: ENGINE_OK,
                compare_result: 0.5,
                ..Default::default()
            }
        }
    }

    thread_local! {
        static STATE: RefCell<FakeState> = RefCell::new(FakeState::fresh());
    }

    fn with_state<R>(f: impl FnOnce(&mut FakeState) -> R) -> R {
        STATE.with(|state| f(&mut state.borrow_mut()))
    }

    fn reset_state() {
        STATE.with(|state| *state.borrow_mut() = FakeState::fresh());
    }

    /// malloc a counted buffer and copy `values` into it.
    fn engine_alloc<T: Copy>(state: &mut FakeState, values: &[T]) -> *mut T {
        state.buffers_allocated += 1;
        state.live_buffers += 1;
        // SAFETY: allocating and filling a buffer the binding will adopt and
        // hand back through fake_release_buffer.
        unsafe {
            let ptr = libc::malloc(std::mem::size_of_val(values).max(1)) as *mut T;
            assert!(!ptr.is_null());
            std::ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len());
            ptr
        }
    }

    unsafe extern "C" fn fake_init(_model_dir: *const c_char, _log_path: *const c_char) -> c_int {
        with_state(|s| {
            s.init_calls += 1;
            s.init_status
        })
    }

    unsafe extern "C" fn fake_release() {
        with_state(|s| s.release_calls += 1);
    }

    unsafe extern "C" fn fake_release_buffer(ptr: *mut c_void) {
        with_state(|s| {
            s.buffers_released += 1;
            s.live_buffers -= 1;
        });
        // SAFETY: every fake buffer comes from libc::malloc.
        unsafe { libc::free(ptr) };
    }

    unsafe extern "C" fn fake_extract(
        _image: *const u8,
        _image_len: c_int,
        regions: *const c_int,
        region_count: c_int,
        features: *mut f32,
    ) -> c_int {
        with_state(|s| {
            s.native_calls += 1;
            // SAFETY: the binding passes REGION_FIELDS ints per region.
            s.last_flat_regions = unsafe {
                std::slice::from_raw_parts(regions, region_count as usize * REGION_FIELDS)
            }
            .to_vec();
            if s.extract_status != ENGINE_OK {
                return s.extract_status;
            }
            // Fill each feature with its 1-based face index.
            // SAFETY: the binding sizes the output to region_count *
            // FEATURE_LEN floats.
            let out = unsafe {
                std::slice::from_raw_parts_mut(features, region_count as usize * FEATURE_LEN)
            };
            for (i, chunk) in out.chunks_exact_mut(FEATURE_LEN).enumerate() {
                chunk.fill((i + 1) as f32);
            }
            s.extract_status
        })
    }

    unsafe extern "C" fn fake_detect(
        _image: *const u8,
        _image_len: c_int,
        regions_out: *mut *mut c_int,
        count_out: *mut c_int,
        features_out: *mut *mut f32,
        feature_len_out: *mut c_int,
    ) -> c_int {
        with_state(|s| {
            s.native_calls += 1;
            if s.detect_status != ENGINE_OK && !s.alloc_on_failure {
                return s.detect_status;
            }

            let count = s.faces.len();
            let flat: Vec<c_int> = s.faces.iter().flatten().copied().collect();
            let feature_len = s
                .feature_len_override
                .unwrap_or((count * FEATURE_LEN) as c_int);
            let features: Vec<f32> = (0..feature_len.max(0) as usize)
                .map(|i| (i / FEATURE_LEN + 1) as f32)
                .collect();

            let regions_ptr = if count == 0 {
                std::ptr::null_mut()
            } else {
                engine_alloc(s, &flat)
            };
            let features_ptr = if features.is_empty() {
                std::ptr::null_mut()
            } else {
                engine_alloc(s, &features)
            };
            // SAFETY: the out-pointers are live locals in the binding.
            unsafe {
                *regions_out = regions_ptr;
                *count_out = count as c_int;
                *features_out = features_ptr;
                *feature_len_out = feature_len;
            }
            s.detect_status
        })
    }

    unsafe extern "C" fn fake_score(
        _image: *const u8,
        _image_len: c_int,
        regions: *const c_int,
        region_count: c_int,
        quality_out: *mut c_int,
        pose_out: *mut f32,
    ) -> c_int {
        with_state(|s| {
            s.native_calls += 1;
            // SAFETY: the binding passes REGION_FIELDS ints per region.
            s.last_flat_regions = unsafe {
                std::slice::from_raw_parts(regions, region_count as usize * REGION_FIELDS)
            }
            .to_vec();
            if s.score_status != ENGINE_OK {
                return s.score_status;
            }
            for i in 0..region_count as usize {
                let (quality, pose) = s.scores.get(i).copied().unwrap_or((10, 1.0));
                // SAFETY: the binding sizes both outputs to region_count.
                unsafe {
                    *quality_out.add(i) = quality;
                    *pose_out.add(i) = pose;
                }
            }
            s.score_status
        })
    }

    unsafe extern "C" fn fake_compare(
        _a: *const f32,
        _len_a: c_int,
        _b: *const f32,
        _len_b: c_int,
    ) -> f32 {
        with_state(|s| {
            s.native_calls += 1;
            s.compare_result
        })
    }

    fn fake_table() -> EngineTable {
        EngineTable::from_raw(
            fake_init,
            fake_extract,
            fake_detect,
            fake_score,
            fake_compare,
            fake_release_buffer,
            fake_release,
        )
    }

    fn fake_engine() -> NativeEngine {
        NativeEngine::with_table(fake_table(), Path::new("models"), None).unwrap()
    }

    fn region(left: i32, top: i32, size: i32) -> Region {
        Region {
            left,
            top,
            width: size,
            height: size,
        }
    }

    fn feature(seed: f32) -> FeatureVector {
        FeatureVector::new(vec![seed; FEATURE_LEN]).unwrap()
    }

    #[test]
    fn test_init_once_release_once() {
        reset_state();
        let engine = fake_engine();
        assert_eq!(with_state(|s| (s.init_calls, s.release_calls)), (1, 0));
        drop(engine);
        assert_eq!(with_state(|s| (s.init_calls, s.release_calls)), (1, 1));
    }

    #[test]
    fn test_failed_init_never_releases() {
        reset_state();
        with_state(|s| s.init_status = 0);
        let err = NativeEngine::with_table(fake_table(), Path::new("models"), None).unwrap_err();
        assert!(matches!(err, LoadError::InitFailed(0)));
        assert_eq!(with_state(|s| s.release_calls), 0);
    }

    #[test]
    fn test_detect_and_extract_adopts_both_buffers() {
        reset_state();
        with_state(|s| s.faces = vec![[10, 20, 80, 90], [200, 40, 100, 110]]);
        let mut engine = fake_engine();
        let faces = engine.detect_and_extract(b"jpeg").unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(
            faces[0].0,
            Region {
                left: 10,
                top: 20,
                width: 80,
                height: 90
            }
        );
        assert_eq!(
            faces[1].0,
            Region {
                left: 200,
                top: 40,
                width: 100,
                height: 110
            }
        );
        assert_eq!(faces[0].1.as_slice()[0], 1.0);
        assert_eq!(faces[1].1.as_slice()[FEATURE_LEN - 1], 2.0);
        // Both engine buffers were transferred and released.
        let (allocated, released, live) =
            with_state(|s| (s.buffers_allocated, s.buffers_released, s.live_buffers));
        assert_eq!((allocated, released, live), (2, 2, 0));
    }

    #[test]
    fn test_detect_zero_faces_is_empty_success() {
        reset_state();
        let mut engine = fake_engine();
        let faces = engine.detect_and_extract(b"jpeg").unwrap();
        assert!(faces.is_empty());
        assert_eq!(with_state(|s| s.buffers_allocated), 0);
    }

    #[test]
    fn test_detect_failure_releases_partial_output() {
        reset_state();
        with_state(|s| {
            s.faces = vec![[0, 0, 50, 50]];
            s.detect_status = 7;
            s.alloc_on_failure = true;
        });
        let mut engine = fake_engine();
        let err = engine.detect_and_extract(b"jpeg").unwrap_err();
        assert!(matches!(err, EngineError::CallFailed { code: 7, .. }));
        // The buffers allocated by the failing call still came back.
        let (allocated, released, live) =
            with_state(|s| (s.buffers_allocated, s.buffers_released, s.live_buffers));
        assert_eq!(allocated, 2);
        assert_eq!(released, 2);
        assert_eq!(live, 0);
    }

    #[test]
    fn test_detect_bad_feature_len_releases_buffers() {
        reset_state();
        with_state(|s| {
            s.faces = vec![[0, 0, 50, 50]];
            s.feature_len_override = Some((FEATURE_LEN - 3) as c_int);
        });
        let mut engine = fake_engine();
        let err = engine.detect_and_extract(b"jpeg").unwrap_err();
        assert!(matches!(err, EngineError::MalformedOutput { .. }));
        assert_eq!(with_state(|s| s.live_buffers), 0);
    }

    #[test]
    fn test_no_buffer_leaks_across_mixed_outcomes() {
        reset_state();
        with_state(|s| s.faces = vec![[10, 10, 64, 64]]);
        let mut engine = fake_engine();

        engine.detect_and_extract(b"a").unwrap();
        engine.extract_features(b"b", &[region(0, 0, 32)]).unwrap();
        with_state(|s| s.detect_status = 3);
        engine.detect_and_extract(b"c").unwrap_err();
        with_state(|s| {
            s.detect_status = ENGINE_OK;
            s.feature_len_override = Some(5);
        });
        engine.detect_and_extract(b"d").unwrap_err();

        let (allocated, released, live) =
            with_state(|s| (s.buffers_allocated, s.buffers_released, s.live_buffers));
        assert_eq!(allocated, released);
        assert_eq!(live, 0);
    }

    #[test]
    fn test_extract_features_flat_region_layout() {
        reset_state();
        let mut engine = fake_engine();
        let regions = [
            Region {
                left: 1,
                top: 2,
                width: 3,
                height: 4,
            },
            Region {
                left: 5,
                top: 6,
                width: 7,
                height: 8,
            },
        ];
        let features = engine.extract_features(b"jpeg", &regions).unwrap();
        assert_eq!(features.len(), 2);
        assert!(features.iter().all(|f| f.as_slice().len() == FEATURE_LEN));
        assert_eq!(features[0].as_slice()[FEATURE_LEN - 1], 1.0);
        assert_eq!(features[1].as_slice()[0], 2.0);
        // Regions crossed the boundary as flat left/top/width/height ints.
        assert_eq!(
            with_state(|s| s.last_flat_regions.clone()),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_extract_features_zero_regions_skips_engine() {
        reset_state();
        let mut engine = fake_engine();
        let before = with_state(|s| s.native_calls);
        let features = engine.extract_features(b"jpeg", &[]).unwrap();
        assert!(features.is_empty());
        assert_eq!(with_state(|s| s.native_calls), before);
    }

    #[test]
    fn test_extract_features_surfaces_status_code() {
        reset_state();
        with_state(|s| s.extract_status = -2);
        let mut engine = fake_engine();
        let err = engine
            .extract_features(b"jpeg", &[region(0, 0, 10)])
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CallFailed {
                call: "extractFeatures",
                code: -2,
            }
        ));
    }

    #[test]
    fn test_score_quality_pairs_outputs() {
        reset_state();
        with_state(|s| s.scores = vec![(8, 0.3), (3, -0.5)]);
        let mut engine = fake_engine();
        let scores = engine
            .score_quality(b"jpeg", &[region(0, 0, 64), region(100, 0, 64)])
            .unwrap();
        assert_eq!(
            scores,
            vec![
                CropScore {
                    quality: 8,
                    pose: 0.3
                },
                CropScore {
                    quality: 3,
                    pose: -0.5
                },
            ]
        );
    }

    #[test]
    fn test_compare_clamps_out_of_range() {
        reset_state();
        with_state(|s| s.compare_result = 1.5);
        let mut engine = fake_engine();
        let a = feature(1.0);
        let b = feature(2.0);
        assert_eq!(engine.compare_features(&a, &b).unwrap(), 1.0);
        with_state(|s| s.compare_result = -0.25);
        assert_eq!(engine.compare_features(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_compare_rejects_non_finite() {
        reset_state();
        with_state(|s| s.compare_result = f32::NAN);
        let mut engine = fake_engine();
        let a = feature(1.0);
        let b = feature(2.0);
        let err = engine.compare_features(&a, &b).unwrap_err();
        assert!(matches!(err, EngineError::MalformedOutput { .. }));
    }

    #[test]
    fn test_region_flat_layout_roundtrip() {
        let flat = flatten_regions(&[Region {
            left: 9,
            top: 8,
            width: 7,
            height: 6,
        }]);
        assert_eq!(flat, vec![9, 8, 7, 6]);
        assert_eq!(
            region_from_flat(&flat),
            Region {
                left: 9,
                top: 8,
                width: 7,
                height: 6,
            }
        );
    }
}
