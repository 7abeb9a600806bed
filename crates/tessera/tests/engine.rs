//! End-to-end engine tests.
//!
//! Fixtures are generated on the fly: a striped pyramidal TIFF, a JPEG
//! masquerading under a .png identifier, and an in-memory delegate. Every
//! test runs the full path - provider, detector, info cache, pipeline,
//! derivative cache.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tessera::{
    Config, Crop, Delegate, Encode, Engine, Error, Format, Operation, OperationList, Rect,
    Request, Scale,
};
use tessera_core::Result;

/// Writes a two-level striped pyramidal TIFF (800 and 400 wide).
fn pyramid_tiff() -> Vec<u8> {
    use tiff::encoder::{colortype, TiffEncoder};

    let level = |size: u32| -> Vec<u8> {
        (0..size * size)
            .flat_map(|i| {
                let (x, y) = (i % size, i / size);
                [(x * 255 / size) as u8, (y * 255 / size) as u8, 60]
            })
            .collect()
    };

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buffer).expect("encoder");
        let mut img = encoder.new_image::<colortype::RGB8>(800, 800).expect("image");
        img.rows_per_strip(32).expect("strips");
        img.write_data(&level(800)).expect("level 0");
        let mut img = encoder.new_image::<colortype::RGB8>(400, 400).expect("image");
        img.rows_per_strip(32).expect("strips");
        img.write_data(&level(400)).expect("level 1");
    }
    buffer.into_inner()
}

/// Encodes a small JPEG.
fn jpeg_bytes() -> Vec<u8> {
    let data: Vec<u8> = (0..64u32 * 64).flat_map(|i| [(i % 256) as u8, 80, 80]).collect();
    let mut out = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut out, 90);
    encoder
        .encode(&data, 64, 64, jpeg_encoder::ColorType::Rgb)
        .expect("encode fixture");
    out
}

struct Fixture {
    engine: Engine,
    _source_dir: tempfile::TempDir,
    _cache_dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let source_dir = tempfile::tempdir().expect("source dir");
    let cache_dir = tempfile::tempdir().expect("cache dir");

    std::fs::write(source_dir.path().join("pyramid.tif"), pyramid_tiff()).expect("fixture");
    // A JPEG with a lying extension.
    std::fs::write(source_dir.path().join("masquerade.png"), jpeg_bytes()).expect("fixture");

    let mut config = Config::default();
    config.filesystem.prefix = source_dir.path().to_path_buf();
    config.cache.derivative.enabled = true;
    config.cache.derivative.dir = cache_dir.path().to_path_buf();

    Fixture {
        engine: Engine::new(config).expect("engine"),
        _source_dir: source_dir,
        _cache_dir: cache_dir,
    }
}

fn crop_scale_ops() -> OperationList {
    OperationList::new(vec![
        Operation::Crop(Crop::Pixels(Rect::new(200, 200, 400, 400))),
        Operation::Scale(Scale::FitWidth(200)),
        Operation::Encode(Encode::new(Format::Png)),
    ])
    .expect("ops")
}

#[test]
fn pyramidal_deep_zoom() {
    let fixture = fixture();
    // Crop 400 wide, fit to 200 -> scale 0.5 -> level 1, residual 1.0.
    let request = Request::new("pyramid.tif", crop_scale_ops());

    let mut body = Vec::new();
    let media_type = fixture.engine.fulfill(&request, &mut body).expect("fulfill");
    assert_eq!(media_type.as_str(), "image/png");
    assert_eq!(&body[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);

    // One derivative landed in the cache.
    let stats = fixture.engine.derivative_cache_stats().expect("cache on");
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 0);
}

#[test]
fn cache_hit_is_byte_identical() {
    let fixture = fixture();
    let request = Request::new("pyramid.tif", crop_scale_ops());

    let mut first = Vec::new();
    fixture.engine.fulfill(&request, &mut first).expect("first");
    let mut second = Vec::new();
    fixture.engine.fulfill(&request, &mut second).expect("second");

    assert_eq!(first, second);
    let stats = fixture.engine.derivative_cache_stats().expect("cache on");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn quarter_scale_striped() {
    let fixture = fixture();
    // 25% of the full image: r=2, served from level 1 plus subsampling.
    let ops = OperationList::new(vec![
        Operation::Scale(Scale::Percent(0.25)),
        Operation::Encode(Encode::new(Format::Png)),
    ])
    .expect("ops");

    let mut body = Vec::new();
    fixture
        .engine
        .fulfill(&Request::new("pyramid.tif", ops), &mut body)
        .expect("fulfill");

    // Decode and verify the output geometry.
    let mut reader = tessera_io::png::PngReader::new(
        "out.png",
        Box::new(Cursor::new(body)),
        tessera_io::DecodeOptions::default(),
    )
    .expect("reopen");
    let (matrix, _) = tessera_io::ImageReader::read(&mut reader, 0, None, 1).expect("decode");
    assert_eq!((matrix.width, matrix.height), (200, 200));
}

#[test]
fn extension_mismatch_resolves_by_magic() {
    let fixture = fixture();
    // The identifier says PNG; the bytes say JPEG. Magic wins and the
    // request completes.
    let ops = OperationList::new(vec![
        Operation::Scale(Scale::FitWidth(32)),
        Operation::Encode(Encode::new(Format::Jpeg)),
    ])
    .expect("ops");

    let mut body = Vec::new();
    let media_type = fixture
        .engine
        .fulfill(&Request::new("masquerade.png", ops), &mut body)
        .expect("fulfill");
    assert_eq!(media_type.as_str(), "image/jpeg");
    assert_eq!(&body[..3], &[0xFF, 0xD8, 0xFF]);
}

#[test]
fn missing_identifier_is_not_found() {
    let fixture = fixture();
    let err = fixture
        .engine
        .fulfill(&Request::new("absent.tif", crop_scale_ops()), &mut Vec::new())
        .unwrap_err();
    assert!(err.is_not_found());

    // Failures never leave cache entries behind.
    assert_eq!(fixture.engine.derivative_cache_stats().expect("cache on").entries, 0);
}

#[test]
fn traversal_identifiers_stay_inside_the_root() {
    let fixture = fixture();
    let err = fixture
        .engine
        .fulfill(
            &Request::new("../../etc/passwd.png", crop_scale_ops()),
            &mut Vec::new(),
        )
        .unwrap_err();
    // Sanitization collapses the traversal; the lookup simply misses.
    assert!(err.is_not_found(), "got {err:?}");
}

/// Delegate that counts pathname lookups and resolves everything to one
/// fixture file, or refuses when asked for "missing".
struct CountingDelegate {
    root: std::path::PathBuf,
    calls: AtomicUsize,
}

impl Delegate for CountingDelegate {
    fn call(&self, hook: &str, identifier: &str) -> Result<Option<String>> {
        if hook != tessera_source::hooks::PATHNAME {
            return Ok(None);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if identifier == "missing" {
            return Ok(None);
        }
        Ok(Some(self.root.join("pyramid.tif").display().to_string()))
    }
}

fn delegate_fixture() -> (Arc<Engine>, Arc<CountingDelegate>, tempfile::TempDir, tempfile::TempDir)
{
    let source_dir = tempfile::tempdir().expect("source dir");
    let cache_dir = tempfile::tempdir().expect("cache dir");
    std::fs::write(source_dir.path().join("pyramid.tif"), pyramid_tiff()).expect("fixture");

    let delegate = Arc::new(CountingDelegate {
        root: source_dir.path().to_path_buf(),
        calls: AtomicUsize::new(0),
    });

    let mut config = Config::default();
    config.filesystem.prefix = source_dir.path().to_path_buf();
    config.filesystem.lookup_strategy = tessera_core::LookupStrategy::Script;
    config.cache.derivative.enabled = true;
    config.cache.derivative.dir = cache_dir.path().to_path_buf();

    let engine =
        Engine::with_delegate(config, Some(delegate.clone() as Arc<dyn Delegate>))
            .expect("engine");
    (Arc::new(engine), delegate, source_dir, cache_dir)
}

#[test]
fn delegate_nil_is_not_found() {
    let (engine, _delegate, _source, _cache) = delegate_fixture();
    let err = engine
        .fulfill(&Request::new("missing", crop_scale_ops()), &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
    assert_eq!(engine.derivative_cache_stats().expect("cache on").entries, 0);
}

#[test]
fn concurrent_duplicates_build_once() {
    let (engine, delegate, _source, _cache) = delegate_fixture();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let mut body = Vec::new();
            engine
                .fulfill(&Request::new("anything", crop_scale_ops()), &mut body)
                .expect("fulfill");
            body
        }));
    }
    let bodies: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().expect("thread")).collect();

    // All responses are identical, one cache entry exists, and the source
    // was resolved exactly once: followers were served from the leader's
    // completed entry.
    for body in &bodies {
        assert_eq!(body, &bodies[0]);
        assert!(!body.is_empty());
    }
    assert_eq!(engine.derivative_cache_stats().expect("cache on").entries, 1);
    assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cancelled_request_does_no_work() {
    let fixture = fixture();
    let token = tessera::CancellationToken::new();
    token.cancel();

    let err = fixture
        .engine
        .fulfill_cancellable(
            &Request::new("pyramid.tif", crop_scale_ops()),
            &mut Vec::new(),
            token,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[test]
fn purge_drops_cached_state() {
    let fixture = fixture();
    let request = Request::new("pyramid.tif", crop_scale_ops());
    fixture.engine.fulfill(&request, &mut Vec::new()).expect("build");
    assert_eq!(fixture.engine.derivative_cache_stats().expect("cache on").entries, 1);

    assert_eq!(fixture.engine.purge_identifier("pyramid.tif").expect("purge"), 1);
    assert_eq!(fixture.engine.derivative_cache_stats().expect("cache on").entries, 0);

    // Next request rebuilds.
    fixture.engine.fulfill(&request, &mut Vec::new()).expect("rebuild");
    assert_eq!(fixture.engine.derivative_cache_stats().expect("cache on").entries, 1);
}

#[test]
fn info_cache_warms_after_first_request() {
    let fixture = fixture();
    let request = Request::new("pyramid.tif", crop_scale_ops());

    fixture.engine.fulfill(&request, &mut Vec::new()).expect("first");
    let misses_after_first = fixture.engine.info_cache_stats().misses;

    // Different derivative, same source: the description is reused.
    let ops = OperationList::new(vec![
        Operation::Scale(Scale::Percent(0.5)),
        Operation::Encode(Encode::new(Format::Png)),
    ])
    .expect("ops");
    fixture
        .engine
        .fulfill(&Request::new("pyramid.tif", ops), &mut Vec::new())
        .expect("second");

    let stats = fixture.engine.info_cache_stats();
    assert_eq!(stats.misses, misses_after_first);
    assert!(stats.hits >= 1);
}

#[test]
fn reload_swaps_config_snapshot() {
    let fixture = fixture();
    let mut config = (*fixture.engine.config()).clone();
    config.processor.max_pixels = 10;
    fixture.engine.reload_config(config);

    let err = fixture
        .engine
        .fulfill(&Request::new("pyramid.tif", crop_scale_ops()), &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}
