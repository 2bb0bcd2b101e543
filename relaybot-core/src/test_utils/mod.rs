//! Scripted collaborators for exercising the pipeline without network access.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use relaybot_ai::{CompletionApi, CompletionRequest, CompletionResponse};
use relaybot_common::models::{InboundMessage, OutboundReply, Platform, SenderRoles};

use crate::Error;
use crate::platforms::ChatPlatform;

/// Completion API that replays queued results, then optionally repeats one
/// response forever. Every request is recorded.
pub struct ScriptedCompletionApi {
    script: Mutex<VecDeque<Result<CompletionResponse, Error>>>,
    repeat: Option<CompletionResponse>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionApi {
    pub fn new(script: Vec<Result<CompletionResponse, Error>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: CompletionResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CompletionApi for ScriptedCompletionApi {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.requests.lock().push(request);
        let next = self.script.lock().pop_front();
        match (next, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(Error::Completion("scripted completion exhausted".into())),
        }
    }
}

/// Chat platform that keeps every reply instead of sending it.
pub struct RecordingPlatform {
    platform: Platform,
    max_len: usize,
    fail_sends: bool,
    sent: Mutex<Vec<OutboundReply>>,
}

impl RecordingPlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            max_len: platform.max_message_len(),
            fail_sends: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn sent(&self) -> Vec<OutboundReply> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn max_message_len(&self) -> usize {
        self.max_len
    }

    async fn send_message(&self, reply: &OutboundReply) -> Result<(), Error> {
        if self.fail_sends {
            return Err(Error::Platform("send disabled".into()));
        }
        self.sent.lock().push(reply.clone());
        Ok(())
    }
}

/// A Twitch chat line from `user` with no special roles.
pub fn twitch_message(user_id: &str, user_name: &str, text: &str) -> InboundMessage {
    InboundMessage {
        platform: Platform::TwitchIRC,
        channel: "#channel".to_string(),
        user_id: user_id.to_string(),
        user_name: user_name.to_string(),
        text: text.to_string(),
        roles: SenderRoles::default(),
        addressed: false,
        reply_to: None,
    }
}
