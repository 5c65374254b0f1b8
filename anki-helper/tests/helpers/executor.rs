//! Scripted executor
//!
//! Answers script invocations from a closure instead of spawning processes,
//! recording the parameters of each invocation.

use anki_helper::utils::process_runner::{ProcessError, ProcessParams, ScriptExecutor};
use std::sync::Mutex;
use std::time::Duration;

type Responder = dyn Fn(&ProcessParams) -> Result<Vec<u8>, ProcessError> + Send + Sync;

pub struct ScriptedExecutor {
    respond: Box<Responder>,
    invocations: Mutex<Vec<ProcessParams>>,
}

impl ScriptedExecutor {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&ProcessParams) -> Result<Vec<u8>, ProcessError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Always print the same output
    pub fn printing(stdout: &str) -> Self {
        let stdout = stdout.as_bytes().to_vec();
        Self::new(move |_| Ok(stdout.clone()))
    }

    pub fn invocations(&self) -> Vec<ProcessParams> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ScriptExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        params: &ProcessParams,
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ProcessError> {
        self.invocations.lock().unwrap().push(params.clone());
        (self.respond)(params)
    }
}
