//! Synthetic source through the full pipeline with the motion detector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use frame_pipeline::{
    open_source, BackendRegistry, FrameSink, GateConfig, JpegFileSink, Pipeline,
    PipelineOptions, SourceSettings,
};

#[test]
fn synthetic_frames_flow_to_jpeg_sink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sink = Arc::new(JpegFileSink::new(dir.path())?);
    let latest = sink.latest_path();

    let settings = SourceSettings {
        url: "stub://porch".to_string(),
        width: 96,
        height: 64,
        target_fps: 10,
    };
    let mut source = open_source(&settings)?;
    source.connect()?;

    let backend = BackendRegistry::standard().select("motion")?;
    let options = PipelineOptions {
        gate: GateConfig {
            min_interval: Duration::from_millis(500),
            warm_up: Duration::ZERO,
        },
        queue_depth: 8,
        ..PipelineOptions::default()
    };
    let sink: Arc<dyn FrameSink> = sink;
    let pipeline = Pipeline::start(options, backend, sink)?;

    for _ in 0..30 {
        pipeline.on_frame(source.next_frame()?);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.stats().published == 0 {
        assert!(Instant::now() < deadline, "nothing published");
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = pipeline.stats();
    assert_eq!(stats.received, 30);
    // Frames are 100 ms apart on the source clock; every fifth one passes.
    assert_eq!(stats.admitted, 6);
    assert_eq!(stats.dropped, 24);

    pipeline.shutdown()?;
    assert_eq!(source.stats().outstanding(), 0);

    let jpeg = image::open(&latest)?.to_rgb8();
    assert_eq!(jpeg.dimensions(), (96, 64));
    Ok(())
}
