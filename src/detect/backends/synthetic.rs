use anyhow::{bail, Result};
use ndarray::{Array3, Array4, ArrayD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::detect::backend::InferenceBackend;
use crate::detect::decode::DecoderConfig;
use crate::detect::result::BoundingBox;

/// Object written into a synthetic output tensor.
///
/// `bbox` is in decoder space (y up), the same frame the decoder reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticObject {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Build a `[1, F, N]` tensor with one object per leading slot.
///
/// Geometry is written the way the model emits it (center, raw y measured
/// from the top); every other slot stays zero.
pub fn synthetic_output(
    features: usize,
    slots: usize,
    decoder: &DecoderConfig,
    objects: &[SyntheticObject],
) -> Result<ArrayD<f32>> {
    let classes = decoder.classes;
    if classes.offset + classes.count > features {
        bail!(
            "class window {}..{} exceeds {} features",
            classes.offset,
            classes.offset + classes.count,
            features
        );
    }
    if objects.len() > slots {
        bail!("{} objects do not fit {} slots", objects.len(), slots);
    }

    let mut out = Array3::<f32>::zeros((1, features, slots));
    for (slot, obj) in objects.iter().enumerate() {
        if obj.class_id >= classes.count {
            bail!(
                "object class {} outside {} scored classes",
                obj.class_id,
                classes.count
            );
        }
        let (cx, cy) = obj.bbox.center();
        out[[0, 0, slot]] = cx;
        out[[0, 1, slot]] = decoder.frame_size - cy;
        out[[0, 2, slot]] = obj.bbox.width;
        out[[0, 3, slot]] = obj.bbox.height;
        out[[0, classes.offset + obj.class_id, slot]] = obj.confidence;
    }
    Ok(out.into_dyn())
}

/// Scripted backend for `stub` configurations and tests.
///
/// Every call returns the configured objects, optionally jittered by a
/// seeded RNG so the overlay sees small frame-to-frame movement.
pub struct SyntheticBackend {
    features: usize,
    slots: usize,
    decoder: DecoderConfig,
    objects: Vec<SyntheticObject>,
    jitter: f32,
    rng: StdRng,
    calls: u64,
    released: bool,
}

impl SyntheticBackend {
    pub fn new(features: usize, slots: usize, decoder: DecoderConfig) -> Self {
        Self {
            features,
            slots,
            decoder,
            objects: Vec::new(),
            jitter: 0.0,
            rng: StdRng::seed_from_u64(0),
            calls: 0,
            released: false,
        }
    }

    /// Replace the scripted objects. Validated against the tensor layout.
    pub fn with_objects(mut self, objects: Vec<SyntheticObject>) -> Result<Self> {
        synthetic_output(self.features, self.slots, &self.decoder, &objects)?;
        self.objects = objects;
        Ok(self)
    }

    /// Jitter object centers by up to `pixels` in each axis.
    pub fn with_jitter(mut self, pixels: f32, seed: u64) -> Self {
        self.jitter = pixels.abs();
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Number of completed inferences.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl InferenceBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        if self.released {
            bail!("synthetic backend used after release");
        }
        let dims = input.dim();
        if dims.0 != 1 || dims.1 != 3 {
            bail!("expected input [1, 3, S, S], got {:?}", input.shape());
        }

        let objects: Vec<SyntheticObject> = if self.jitter > 0.0 {
            let jitter = self.jitter;
            self.objects
                .iter()
                .map(|obj| {
                    let dx = self.rng.gen_range(-jitter..=jitter);
                    let dy = self.rng.gen_range(-jitter..=jitter);
                    SyntheticObject {
                        bbox: BoundingBox {
                            x: obj.bbox.x + dx,
                            y: obj.bbox.y + dy,
                            ..obj.bbox
                        },
                        ..obj.clone()
                    }
                })
                .collect()
        } else {
            self.objects.clone()
        };

        let out = synthetic_output(self.features, self.slots, &self.decoder, &objects)?;
        self.calls += 1;
        Ok(out)
    }

    fn release(&mut self) {
        self.released = true;
        self.objects.clear();
    }
}
