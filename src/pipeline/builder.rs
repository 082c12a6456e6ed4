//! Pipeline builder
//!
//! One builder per role. The first [`build`](PipelineBuilder::build)
//! materializes the pipeline and its dispatch lane; every later call returns
//! the same pipeline, so configuration changes made afterwards are ignored.

use std::sync::{Arc, Mutex};

use tracing::info;

use super::{DispatchLane, LoggingStage, Pipeline, Role};
use crate::codec::TextLineCodec;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::lock;

pub struct PipelineBuilder {
    role: Role,
    config: Config,
    built: Mutex<Option<Arc<Pipeline>>>,
}

impl PipelineBuilder {
    pub fn new(role: Role, config: Config) -> Self {
        Self {
            role,
            config,
            built: Mutex::new(None),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Has no effect on a pipeline that was already built.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Build the pipeline, or return the one built earlier.
    ///
    /// # Errors
    ///
    /// [`Error::MissingArgument`] when no codec is configured, an argument
    /// error for an invalid codec, or [`Error::NoRuntime`] when ordered
    /// dispatch is enabled outside a Tokio runtime.
    pub fn build(&self) -> Result<Arc<Pipeline>> {
        let mut built = lock(&self.built);
        if let Some(pipeline) = built.as_ref() {
            return Ok(Arc::clone(pipeline));
        }

        let codec_config = self
            .config
            .codec
            .as_ref()
            .ok_or(Error::MissingArgument {
                name: "config.codec",
            })?;
        let codec = TextLineCodec::from_config(codec_config)?;

        let logging = self
            .config
            .pipeline
            .log
            .then(|| self.create_logging_stage());
        let lane = if self.config.pipeline.ordered_dispatch {
            Some(DispatchLane::spawn(format!("{}-dispatch", self.role))?)
        } else {
            None
        };

        let pipeline = Arc::new(Pipeline::new(
            self.role,
            codec,
            logging,
            lane,
            self.config.clone(),
        ));
        info!(
            role = %self.role,
            stages = ?pipeline.stage_names(),
            codec = %pipeline.codec(),
            "pipeline built"
        );
        *built = Some(Arc::clone(&pipeline));
        Ok(pipeline)
    }

    pub fn create_logging_stage(&self) -> LoggingStage {
        LoggingStage::from_config(&self.config.pipeline)
    }

    /// The built pipeline, if `build` has succeeded.
    pub fn pipeline(&self) -> Option<Arc<Pipeline>> {
        lock(&self.built).clone()
    }

    fn lane(&self) -> Option<Arc<DispatchLane>> {
        lock(&self.built)
            .as_ref()
            .and_then(|pipeline| pipeline.dispatch_lane().cloned())
    }

    /// Let queued writes finish, then stop the dispatch lane.
    pub fn shutdown_dispatch(&self) {
        if let Some(lane) = self.lane() {
            lane.shutdown();
        }
    }

    /// Stop the dispatch lane and drop queued writes.
    pub fn shutdown_dispatch_now(&self) {
        if let Some(lane) = self.lane() {
            lane.shutdown_now();
        }
    }

    /// True when the built pipeline has no lane, or its lane has exited.
    /// False before the first build.
    pub fn dispatch_disabled_or_terminated(&self) -> bool {
        match lock(&self.built).as_ref() {
            Some(pipeline) => pipeline
                .dispatch_lane()
                .map_or(true, |lane| lane.is_terminated()),
            None => false,
        }
    }

    /// Wait for the dispatch lane to exit. Returns at once without one.
    pub async fn dispatch_terminated(&self) {
        if let Some(lane) = self.lane() {
            lane.terminated().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let builder = PipelineBuilder::new(Role::Acceptor, Config::default());
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(
            first.dispatch_lane().unwrap(),
            second.dispatch_lane().unwrap()
        ));
        assert_eq!(
            first.stage_names(),
            vec!["codec", "logging", "ordered-dispatch"]
        );
    }

    #[tokio::test]
    async fn test_config_changes_after_build_are_ignored() {
        let mut builder = PipelineBuilder::new(Role::Connector, Config::default());
        let first = builder.build().unwrap();

        builder.config_mut().pipeline.log = false;
        builder.config_mut().pipeline.log_width = 6;

        let second = builder.build().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.config().pipeline.log);
        assert_eq!(second.stage_names().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_codec_is_an_argument_error() {
        let mut config = Config::default();
        config.codec = None;
        let builder = PipelineBuilder::new(Role::Acceptor, config);

        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::MissingArgument { name: "config.codec" }));
        assert!(builder.pipeline().is_none());
        assert!(!builder.dispatch_disabled_or_terminated());
    }

    #[tokio::test]
    async fn test_optional_stages() {
        let mut config = Config::default();
        config.pipeline.log = false;
        config.pipeline.ordered_dispatch = false;
        let builder = PipelineBuilder::new(Role::Acceptor, config);

        let pipeline = builder.build().unwrap();
        assert_eq!(pipeline.stage_names(), vec!["codec"]);
        assert!(pipeline.dispatch_lane().is_none());
        assert!(builder.dispatch_disabled_or_terminated());
    }

    #[tokio::test]
    async fn test_shutdown_dispatch_terminates_lane() {
        let builder = PipelineBuilder::new(Role::Acceptor, Config::default());
        let pipeline = builder.build().unwrap();

        builder.shutdown_dispatch();
        builder.dispatch_terminated().await;

        assert!(builder.dispatch_disabled_or_terminated());
        assert!(!pipeline.dispatch_lane().unwrap().submit(async {}));
    }
}
