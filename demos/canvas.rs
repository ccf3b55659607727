//! Canvas example.
//!
//! Opens the array once, puts three nodes on a canvas (beamformed output,
//! raw mic 1, playback reference) and prints what each node emits.
//!
//! Run with: cargo run --example canvas

use std::sync::Arc;
use std::time::Duration;

use mic_array_stream::{
    event_callback, format_elapsed, list_input_devices, Canvas, CanvasCommand, Channel,
    ChannelSink, MicArrayConfig, NodeOutput, OutputRouter, OutputSink, SharedStreamRegistry,
    Transport,
};
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    for device in list_input_devices()? {
        println!(
            "[{}] {} ({} input channels)",
            device.index, device.name, device.max_input_channels
        );
    }

    let config = MicArrayConfig::from_settings_json(
        r#"{ "default_sampling_rate": 16000, "chunk_size": 1024, "use_pref_counter": true }"#,
    )?;
    let registry = Arc::new(
        SharedStreamRegistry::cpal(config)?
            .with_event_callback(event_callback(|e| tracing::warn!(?e, "stream event"))),
    );

    let mut canvas = Canvas::new(Arc::clone(&registry));
    canvas.add_mic_node(1)?;
    canvas.add_mic_node(2)?.select_channel(Channel::Mic1);
    canvas.add_mic_node(3)?.select_channel(Channel::PlaybackReference);
    println!("{}", canvas.node(1)?.status().status_line());

    let (tx, mut rx) = mpsc::channel::<NodeOutput>(256);
    let sinks: Vec<Arc<dyn OutputSink>> = vec![Arc::new(ChannelSink::new(tx))];
    let router = OutputRouter::new(sinks, registry.config());

    let (_transport_tx, transport_rx) = watch::channel(Transport::Playing);
    let (cmd_tx, cmd_rx) = mpsc::channel(8);

    let printer = tokio::spawn(async move {
        while let Some(output) = rx.recv().await {
            let peak = output
                .output
                .samples
                .iter()
                .fold(0.0f32, |peak, s| peak.max(s.abs()));
            println!(
                "node {} chunk {:>4} peak {:.3}",
                output.node_id,
                output.output.host_chunk_index(),
                peak
            );
        }
    });

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = cmd_tx.send(CanvasCommand::Stop).await;
    });

    // One tick per 1024-frame chunk at 16 kHz
    canvas
        .run(&router, transport_rx, cmd_rx, Duration::from_millis(64))
        .await?;

    if let Some(elapsed) = canvas.node(1)?.last_elapsed() {
        println!("last tick: {}", format_elapsed(elapsed));
    }

    drop(router);
    drop(canvas);
    printer.await?;
    Ok(())
}
