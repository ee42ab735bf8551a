#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, ImageFormat, Luma};
use rand::{rngs::StdRng, Rng, SeedableRng};
use vpr_core::{CameraModel, Descriptor, Keypoint, Pose, WordId};
use vpr_db::{Catalog, Database, LabelRecord, SignatureRecord};
use vpr_features::{FeatureError, FeatureExtractor, Features};
use vpr_index::Word;

/// Descriptor length of the test vocabulary.
pub const DIM: usize = 48;
/// Words observed by the matching signature.
pub const MATCHED_WORDS: u32 = 30;
/// Words observed by the decoy signature.
pub const DECOY_WORDS: std::ops::Range<u32> = 30..40;
/// Words in the vocabulary that no signature observed.
pub const UNOBSERVED_WORDS: std::ops::Range<u32> = 40..48;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

/// What the scripted extractor returns, selected by the top-left pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum Scene {
    Blank = 0,
    Match = 1,
    Unobserved = 2,
    NoWords = 3,
    Panic = 4,
    Slow = 5,
}

pub fn descriptor(word: WordId) -> Descriptor {
    let mut d = vec![0.0; DIM];
    d[word as usize] = 10.0;
    d
}

/// Intrinsics as a client sends them, without image size.
pub fn camera() -> CameraModel {
    CameraModel::new(525.0, 525.0, 320.0, 240.0).expect("valid camera")
}

pub fn sized_camera() -> CameraModel {
    camera().with_size(WIDTH, HEIGHT).expect("valid size")
}

/// Pose of the matching signature, and of every synthetic query.
pub fn signature_pose() -> Pose {
    Pose::from_axis_angle([0.02, -0.1, 0.01], [2.0, 0.5, -1.0])
}

fn decoy_pose() -> Pose {
    Pose::from_axis_angle([0.0, 1.2, 0.0], [-4.0, 0.0, 3.0])
}

/// 3D points of the matching signature, in its camera frame.
pub fn matched_points() -> Vec<[f32; 3]> {
    let mut rng = StdRng::seed_from_u64(11);
    (0..MATCHED_WORDS)
        .map(|_| {
            [
                rng.random_range(-2.0..2.0),
                rng.random_range(-1.5..1.5),
                rng.random_range(4.0..9.0),
            ]
        })
        .collect()
}

fn project(point: [f32; 3]) -> Keypoint {
    let p = [point[0] as f64, point[1] as f64, point[2] as f64];
    let uv = sized_camera().project(p).expect("point in front of the camera");
    Keypoint::at(uv[0] as f32, uv[1] as f32)
}

/// One database: a matching signature, a decoy and three labels.
pub fn database() -> Database {
    let words = (0..DIM as u32).map(|w| Word::new(w, descriptor(w))).collect();

    let points = matched_points();
    let matching = SignatureRecord {
        id: 0,
        map_id: 1,
        pose: signature_pose(),
        words: (0..MATCHED_WORDS)
            .map(|w| (w, project(points[w as usize])))
            .collect(),
        words3: (0..MATCHED_WORDS).map(|w| (w, points[w as usize])).collect(),
    };

    let decoy_points: Vec<[f32; 3]> = DECOY_WORDS
        .map(|w| [w as f32 * 0.1 - 3.5, 0.2, 5.0])
        .collect();
    let decoy = SignatureRecord {
        id: 1,
        map_id: 1,
        pose: decoy_pose(),
        words: DECOY_WORDS
            .zip(&decoy_points)
            .map(|(w, p)| (w, project(*p)))
            .collect(),
        words3: DECOY_WORDS.zip(decoy_points.iter().copied()).collect(),
    };

    let pose = signature_pose();
    let labels = vec![
        LabelRecord {
            name: "entrance".to_string(),
            position: pose.transform_point([0.3, -0.2, 5.0]),
        },
        LabelRecord {
            name: "stairs".to_string(),
            position: pose.transform_point([0.0, 0.0, -4.0]),
        },
        LabelRecord {
            name: "window".to_string(),
            position: pose.transform_point([8.0, 0.0, 3.0]),
        },
    ];

    Database {
        words,
        signatures: vec![matching, decoy],
        labels,
    }
}

pub fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::merge(vec![database()]).expect("valid database"))
}

/// A PNG whose top-left pixel selects the scripted scene.
pub fn image(scene: Scene) -> Vec<u8> {
    let img = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Luma([if x == 0 && y == 0 { scene as u8 } else { 0 }])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Returns canned features instead of looking at the image.
pub struct ScriptedExtractor {
    pub delay: Duration,
}

impl Default for ScriptedExtractor {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(300),
        }
    }
}

impl ScriptedExtractor {
    pub fn shared() -> Arc<dyn FeatureExtractor> {
        Arc::new(Self::default())
    }
}

impl FeatureExtractor for ScriptedExtractor {
    fn extract(&self, image: &GrayImage) -> Result<Features, FeatureError> {
        let selector = image.get_pixel(0, 0).0[0];
        let (keypoints, descriptors): (Vec<Keypoint>, Vec<Descriptor>) = match selector {
            s if s == Scene::Match as u8 || s == Scene::Slow as u8 => {
                if s == Scene::Slow as u8 {
                    std::thread::sleep(self.delay);
                }
                let mut pairs: Vec<(Keypoint, Descriptor)> = matched_points()
                    .into_iter()
                    .enumerate()
                    .map(|(w, p)| (project(p), descriptor(w as WordId)))
                    .collect();
                // ambiguous descriptors that match no word
                pairs.extend((0..3).map(|i| (Keypoint::at(10.0 * i as f32, 5.0), vec![0.0; DIM])));
                pairs.into_iter().unzip()
            }
            s if s == Scene::Unobserved as u8 => UNOBSERVED_WORDS
                .map(|w| (Keypoint::at(w as f32, w as f32), descriptor(w)))
                .unzip(),
            s if s == Scene::NoWords as u8 => (0..5)
                .map(|i| (Keypoint::at(i as f32, 1.0), vec![0.0; DIM]))
                .unzip(),
            s if s == Scene::Panic as u8 => panic!("scripted extractor fault"),
            _ => (Vec::new(), Vec::new()),
        };
        Features::new(keypoints, descriptors)
    }

    fn descriptor_dim(&self) -> usize {
        DIM
    }
}

/// Whether every recorded stamp is ordered along the pipeline.
pub fn is_monotonic(session: &vpr_core::Session) -> bool {
    let stamps: Vec<_> = session.timeline().into_iter().flatten().collect();
    stamps.windows(2).all(|w| w[0] <= w[1])
}
