use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::provider::{ChatRequest, DeltaStream, ModelError, ModelProvider, ProviderInfo};

/// Any server speaking the OpenAI `/v1/chat/completions` SSE protocol.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: Option<String>, default_model: String) -> Self {
        Self {
            base_url,
            api_key,
            default_model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    async fn stream_chat(&self, req: &ChatRequest, cancel: CancellationToken) -> Result<DeltaStream, ModelError> {
        let model = req.params.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut body = serde_json::json!({
            "model": model,
            "stream": true,
            "messages": [
                {"role": "system", "content": req.system_prompt},
                {"role": "user", "content": req.user_prompt},
            ],
        });
        if let Some(t) = req.params.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = req.params.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            r = request.send() => r?,
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status { status: status.as_u16(), body });
        }

        let bytes = resp.bytes_stream().boxed();
        let deltas = stream::unfold(
            (bytes, SseDecoder::default(), false),
            |(mut bytes, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if let Some(ev) = decoder.next_event() {
                        return match ev {
                            SseEvent::Delta(text) => Some((Ok(text), (bytes, decoder, false))),
                            SseEvent::Done => {
                                let tail = decoder.finish();
                                if tail.is_empty() {
                                    None
                                } else {
                                    Some((Ok(tail), (bytes, decoder, true)))
                                }
                            }
                            SseEvent::Error(msg) => Some((Err(ModelError::Decode(msg)), (bytes, decoder, true))),
                        };
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, true))),
                        None => {
                            let tail = decoder.finish();
                            return (!tail.is_empty()).then(|| (Ok(tail), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );
        Ok(deltas.boxed())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "openai-compatible".to_string(),
            base_url: self.base_url.clone(),
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Splits an SSE byte stream into chat deltas. Separate `reasoning_content`
/// deltas are folded into the text wrapped in `<think>` tags.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
    pending: std::collections::VecDeque<SseEvent>,
    in_reasoning: bool,
}

impl SseDecoder {
    fn push(&mut self, chunk: &Bytes) {
        self.buf.extend_from_slice(chunk);
        while let Some(nl) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=nl).collect();
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim());
        }
    }

    fn next_event(&mut self) -> Option<SseEvent> {
        self.pending.pop_front()
    }

    /// Closes an unterminated reasoning block at end of stream.
    fn finish(&mut self) -> String {
        if std::mem::take(&mut self.in_reasoning) {
            "</think>".to_string()
        } else {
            String::new()
        }
    }

    fn line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.pending.push_back(SseEvent::Done);
            return;
        }
        let json: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                self.pending.push_back(SseEvent::Error(format!("{e}: {data}")));
                return;
            }
        };
        if let Some(msg) = json["error"]["message"].as_str() {
            self.pending.push_back(SseEvent::Error(msg.to_string()));
            return;
        }

        let delta = &json["choices"][0]["delta"];
        let mut out = String::new();
        if let Some(r) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
            if !self.in_reasoning {
                self.in_reasoning = true;
                out.push_str("<think>");
            }
            out.push_str(r);
        }
        if let Some(c) = delta["content"].as_str().filter(|s| !s.is_empty()) {
            if self.in_reasoning {
                self.in_reasoning = false;
                out.push_str("</think>");
            }
            out.push_str(c);
        }
        if !out.is_empty() {
            self.pending.push_back(SseEvent::Delta(out));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(d: &mut SseDecoder) -> Vec<SseEvent> {
        std::iter::from_fn(|| d.next_event()).collect()
    }

    #[test]
    fn decodes_split_chunks() {
        let mut d = SseDecoder::default();
        d.push(&Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel"));
        assert!(drain(&mut d).is_empty());
        d.push(&Bytes::from_static(b"lo\"}}]}\n\n: keep-alive\ndata: [DONE]\n"));
        assert_eq!(drain(&mut d), vec![SseEvent::Delta("Hello".into()), SseEvent::Done]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut d = SseDecoder::default();
        d.push(&Bytes::copy_from_slice(&line[..split]));
        d.push(&Bytes::copy_from_slice(&line[split..]));
        assert_eq!(drain(&mut d), vec![SseEvent::Delta("é".into())]);
    }

    #[test]
    fn reasoning_content_is_tagged() {
        let mut d = SseDecoder::default();
        d.push(&Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hmm\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        ));
        assert_eq!(
            drain(&mut d),
            vec![SseEvent::Delta("<think>hmm".into()), SseEvent::Delta("</think>ok".into())]
        );
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn error_payload_surfaces() {
        let mut d = SseDecoder::default();
        d.push(&Bytes::from_static(b"data: {\"error\":{\"message\":\"rate limited\"}}\n"));
        assert_eq!(drain(&mut d), vec![SseEvent::Error("rate limited".into())]);
    }
}
