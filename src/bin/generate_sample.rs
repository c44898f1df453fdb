use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use ophys_dff::data::store::{Dataset, DatasetStore};

/// Write a synthetic neuropil-corrected input tree for trying the stage out.
#[derive(Parser, Debug)]
struct Args {
    /// Input root to populate.
    #[arg(long, default_value = "sample_data")]
    root: PathBuf,
    #[arg(long, default_value = "1234567890")]
    experiment_id: String,
    #[arg(long, default_value_t = 12)]
    units: usize,
    #[arg(long, default_value_t = 3000)]
    samples: usize,
    #[arg(long, default_value_t = 11.0)]
    frame_rate_hz: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Baseline fluorescence with slow drift, sparse exponentially decaying
/// transients and Gaussian noise.
fn synth_trace(n: usize, frame_rate_hz: f64, rng: &mut SimpleRng) -> Vec<f64> {
    let f0 = 200.0 + 100.0 * rng.next_f64();
    let drift = 20.0 * rng.next_f64();
    let tau = 0.7 * frame_rate_hz;
    let event_p = 0.05 / frame_rate_hz;

    let mut calcium = 0.0;
    (0..n)
        .map(|i| {
            if rng.next_f64() < event_p {
                calcium += 0.5 + rng.next_f64();
            }
            calcium *= (-1.0 / tau).exp();
            let slow = drift * (i as f64 / n.max(1) as f64);
            (f0 + slow) * (1.0 + calcium) + rng.gauss(0.0, 4.0)
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    let experiment_dir = args.root.join(&args.experiment_id);
    let stage_dir = experiment_dir.join("neuropil_correction");
    std::fs::create_dir_all(&stage_dir)
        .with_context(|| format!("creating {}", stage_dir.display()))?;

    let mut values = Vec::with_capacity(args.units * args.samples);
    for _ in 0..args.units {
        values.extend(synth_trace(args.samples, args.frame_rate_hz, &mut rng));
    }
    let roi_names: Vec<String> = (0..args.units).map(|i| i.to_string()).collect();

    let mut store = DatasetStore::new();
    store.insert(Dataset::float("FC", vec![args.units, args.samples], values));
    store.insert(Dataset::text("roi_names", vec![args.units], roi_names));

    let trace_path = stage_dir.join("neuropil_correction.parquet");
    store.write(&trace_path)?;

    let record = json!({
        "schema_version": "1.1.1",
        "processing_pipeline": {
            "processor_full_name": "Multiplane Ophys Processing Pipeline",
            "pipeline_version": "0.1.0",
            "pipeline_url": "",
            "data_processes": [
                {
                    "name": "Video motion correction",
                    "software_version": "",
                    "start_date_time": "2024-01-01T00:00:00Z",
                    "end_date_time": "2024-01-01T00:10:00Z",
                    "input_location": "",
                    "output_location": "",
                    "code_url": "",
                    "parameters": { "movie_frame_rate_hz": args.frame_rate_hz }
                },
                {
                    "name": "Neuropil correction",
                    "software_version": "",
                    "start_date_time": "2024-01-01T00:20:00Z",
                    "end_date_time": "2024-01-01T00:25:00Z",
                    "input_location": "",
                    "output_location": trace_path.display().to_string(),
                    "code_url": "",
                    "parameters": {}
                }
            ]
        },
        "analyses": [],
        "notes": null
    });
    let record_path = experiment_dir.join("processing.json");
    std::fs::write(&record_path, serde_json::to_vec_pretty(&record)?)
        .with_context(|| format!("writing {}", record_path.display()))?;

    println!(
        "Wrote {} units ({} samples each) to {}",
        args.units,
        args.samples,
        trace_path.display()
    );
    Ok(())
}
