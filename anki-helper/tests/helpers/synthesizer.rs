//! Fake speech synthesizer
//!
//! Returns `audio:<text>` as the audio of each text and records the text sets
//! it was asked for. Selected texts fail with an API error.

use anki_helper::types::{SpeechError, SpeechResult, SpeechSynthesizer};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeSynthesizer {
    failing_texts: HashSet<String>,
    requests: Mutex<Vec<BTreeSet<String>>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_text(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string());
        self
    }

    /// Text sets passed to `synthesize`, one per call
    pub fn requests(&self) -> Vec<BTreeSet<String>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn audio_for(text: &str) -> Vec<u8> {
        format!("audio:{}", text).into_bytes()
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, texts: &BTreeSet<String>) -> BTreeMap<String, SpeechResult> {
        self.requests.lock().unwrap().push(texts.clone());
        texts
            .iter()
            .map(|text| {
                let result = if self.failing_texts.contains(text) {
                    Err(SpeechError::Api(500, "synthesis failed".to_string()))
                } else {
                    Ok(Self::audio_for(text))
                };
                (text.clone(), result)
            })
            .collect()
    }
}
