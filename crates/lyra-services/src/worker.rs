//! Background worker running whole pipeline requests off the caller's thread

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use lyra_core::{Recipe, Renderer};
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalyzerCache, PitchBackend};
use crate::audio_io::AudioBuffer;
use crate::config::PipelineConfig;
use crate::pipeline::{write_outputs, OutputPaths, Pipeline, PipelineError, PipelineResult, StageProgress};

pub enum WorkerRequest {
    Analyze {
        reference: PathBuf,
        vocal: PathBuf,
        config: PipelineConfig,
    },
    /// Re-render the last analysis with an edited recipe snapshot
    Render { recipe: Arc<Recipe> },
    /// Write the last rendered audio and its recipe
    Export { paths: OutputPaths },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Progress(StageProgress),
    Analyzed(Arc<PipelineResult>),
    Rendered {
        recipe: Arc<Recipe>,
        audio: Arc<AudioBuffer>,
    },
    Exported(OutputPaths),
    Failed(String),
}

/// State kept between requests on the worker thread
struct WorkerState {
    renderer: Renderer,
    cache: AnalyzerCache,
    pipeline: Option<Pipeline>,
    last: Option<Arc<PipelineResult>>,
    rendered: Option<(Arc<Recipe>, Arc<AudioBuffer>)>,
}

impl WorkerState {
    fn handle(&mut self, request: WorkerRequest, events: &Sender<WorkerEvent>) -> Result<(), PipelineError> {
        match request {
            WorkerRequest::Analyze {
                reference,
                vocal,
                config,
            } => {
                let pitch = self.cache.pitch_estimator(PitchBackend::Yin, config.hop_length);
                let pipeline = Pipeline::builder(config)
                    .pitch_estimator(pitch)
                    .renderer(self.renderer.clone())
                    .build()?;
                let result = pipeline.analyze_files(&reference, &vocal, &mut |p| {
                    let _ = events.send(WorkerEvent::Progress(p));
                })?;
                let result = Arc::new(result);
                self.rendered = Some((
                    Arc::new(result.recipe.clone()),
                    Arc::new(result.output.clone()),
                ));
                self.last = Some(result.clone());
                self.pipeline = Some(pipeline);
                let _ = events.send(WorkerEvent::Analyzed(result));
            }
            WorkerRequest::Render { recipe } => {
                let (Some(pipeline), Some(last)) = (&self.pipeline, &self.last) else {
                    return Err(no_analysis());
                };
                let audio = Arc::new(pipeline.rerender_result(last, &recipe)?);
                self.rendered = Some((recipe.clone(), audio.clone()));
                let _ = events.send(WorkerEvent::Rendered { recipe, audio });
            }
            WorkerRequest::Export { paths } => {
                let Some((recipe, audio)) = &self.rendered else {
                    return Err(no_analysis());
                };
                write_outputs(&paths, recipe, audio)?;
                let _ = events.send(WorkerEvent::Exported(paths));
            }
            WorkerRequest::Shutdown => {}
        }
        Ok(())
    }
}

fn no_analysis() -> PipelineError {
    PipelineError::Recipe(lyra_core::LyraError::InvalidRecipe(
        "no analysis has been run yet".into(),
    ))
}

pub struct PipelineWorker {
    requests: Sender<WorkerRequest>,
    events: Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    /// Start the worker thread; the renderer must already be probed
    pub fn spawn(renderer: Renderer, cache: AnalyzerCache) -> Self {
        let (req_tx, req_rx) = unbounded::<WorkerRequest>();
        let (evt_tx, evt_rx) = unbounded::<WorkerEvent>();

        let handle = thread::spawn(move || {
            let mut state = WorkerState {
                renderer,
                cache,
                pipeline: None,
                last: None,
                rendered: None,
            };
            info!("pipeline worker started");
            while let Ok(request) = req_rx.recv() {
                if matches!(request, WorkerRequest::Shutdown) {
                    break;
                }
                if let Err(e) = state.handle(request, &evt_tx) {
                    error!(error = %e, "worker request failed");
                    let _ = evt_tx.send(WorkerEvent::Failed(e.to_string()));
                }
            }
            debug!(cached = state.cache.len(), "pipeline worker stopped");
        });

        Self {
            requests: req_tx,
            events: evt_rx,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, request: WorkerRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("pipeline worker panicked");
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
