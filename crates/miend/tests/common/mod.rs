#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::serve;
use image::{Rgb, RgbImage};
use mien_core::{
    DetectorError, ExtractorError, FaceDetector, FaceRegion, MatchPolicy, Signature,
    SignatureExtractor,
};
use mien_store::Store;
use miend::{api, AppState};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Detector stub: reports the same regions for every image.
pub struct StubDetector {
    pub regions: Vec<FaceRegion>,
}

impl FaceDetector for StubDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(self.regions.clone())
    }
}

/// Extractor stub: the signature is the crop's mean RGB color, so crops of
/// different colors resolve to different identities.
pub struct MeanColorExtractor;

impl SignatureExtractor for MeanColorExtractor {
    fn extract(&self, crop: &RgbImage) -> Result<Option<Signature>, ExtractorError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(None);
        }
        let mut sums = [0f64; 3];
        for pixel in crop.pixels() {
            for (channel, sum) in sums.iter_mut().enumerate() {
                *sum += f64::from(pixel[channel]);
            }
        }
        let count = f64::from(crop.width()) * f64::from(crop.height());
        Ok(Some(Signature {
            values: sums.iter().map(|s| (s / count) as f32).collect(),
        }))
    }
}

/// Extractor stub that can never represent a crop.
pub struct NullExtractor;

impl SignatureExtractor for NullExtractor {
    fn extract(&self, _crop: &RgbImage) -> Result<Option<Signature>, ExtractorError> {
        Ok(None)
    }
}

pub struct TestServer {
    pub base_url: String,
    pub state: Arc<AppState>,
    /// Holds the temp data directory alive for the test's duration.
    pub data: TempDir,
}

pub fn region(x: f32, y: f32, width: f32, height: f32) -> FaceRegion {
    FaceRegion {
        x,
        y,
        width,
        height,
        confidence: 0.9,
    }
}

pub async fn spawn_server(regions: Vec<FaceRegion>, api_key: Option<&str>) -> TestServer {
    spawn_server_with_extractor(regions, Arc::new(MeanColorExtractor), api_key).await
}

pub async fn spawn_server_with_extractor(
    regions: Vec<FaceRegion>,
    extractor: Arc<dyn SignatureExtractor + Send + Sync>,
    api_key: Option<&str>,
) -> TestServer {
    let data = TempDir::new().unwrap();
    let captured_dir = data.path().join("captured_faces");
    let pending_dir = captured_dir.join("pending_jobs");
    std::fs::create_dir_all(&pending_dir).unwrap();

    let store = Store::open(&data.path().join("captures.db")).unwrap();

    let state = Arc::new(AppState {
        store,
        detector: Arc::new(StubDetector { regions }),
        extractor,
        matcher: MatchPolicy::First.matcher(),
        match_threshold: mien_core::DEFAULT_MATCH_THRESHOLD,
        api_key: api_key.map(String::from),
        origin_default: "test-origin".to_string(),
        captured_dir,
        pending_dir,
        extract_timeout: Duration::from_secs(10),
        match_gate: tokio::sync::Mutex::new(()),
    });

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = api::routes::router(state.clone());
    tokio::spawn(async move {
        serve(listener, app.into_make_service()).await.unwrap();
    });

    TestServer {
        base_url: format!("http://127.0.0.1:{port}"),
        state,
        data,
    }
}

/// 200x100 test frame: left half red, right half blue. Regions placed well
/// inside either half stay single-colored even after crop padding.
pub fn two_tone_frame() -> Vec<u8> {
    let mut frame = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
    for y in 0..100 {
        for x in 100..200 {
            frame.put_pixel(x, y, Rgb([0, 0, 255]));
        }
    }
    encode_png(&frame)
}

/// Uniform red frame for single-face tests.
pub fn red_frame() -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(100, 100, Rgb([255, 0, 0])))
}

pub fn encode_png(frame: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(frame.clone())
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
    bytes
}

pub async fn upload(
    base_url: &str,
    png: Vec<u8>,
    api_key: Option<&str>,
    origin: Option<&str>,
) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(png).file_name("frame.png");
    let mut form = reqwest::multipart::Form::new().part("file", part);
    if let Some(origin) = origin {
        form = form.text("origin", origin.to_string());
    }

    let mut request = reqwest::Client::new()
        .post(format!("{base_url}/upload-face"))
        .multipart(form);
    if let Some(key) = api_key {
        request = request.header("X-Api-Key", key);
    }
    request.send().await.unwrap()
}
