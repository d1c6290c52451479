//! Gateway-backed capability adapters.
//!
//! The perception and language models run behind an HTTP model gateway; each
//! adapter POSTs a JSON request to one endpoint and decodes a JSON response
//! carrying the typed result plus token usage. Uses `ureq` for synchronous
//! HTTP — capability calls already run on blocking threads.

use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::config::GatewayConfig;
use crate::context::{Context, Entity};
use crate::cost::TokenUsage;

use super::{
    Answerer, CapabilityError, CapabilityResult, CapabilitySuite, FallbackPerceiver, ImageRef,
    LogicGenerator, LogicReasoner, Metered, Perceiver, PerceptionOutput, Verdict,
};

/// One HTTP client per suite; adapters share it by reference.
#[derive(Clone)]
pub struct Gateway {
    base_url: String,
    http: ureq::Agent,
}

impl Gateway {
    pub fn new(config: &GatewayConfig) -> Self {
        let http = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Build a full suite of gateway adapters sharing this client.
    pub fn suite(config: &GatewayConfig) -> CapabilitySuite {
        let gateway = Gateway::new(config);
        CapabilitySuite {
            perceiver: Box::new(RemotePerceiver(gateway.clone())),
            fallback: Box::new(RemoteFallbackPerceiver(gateway.clone())),
            generator: Box::new(RemoteLogicGenerator(gateway.clone())),
            reasoner: Box::new(RemoteLogicReasoner(gateway.clone())),
            answerer: Box::new(RemoteAnswerer(gateway)),
        }
    }

    fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        capability: &str,
        endpoint: &str,
        request: &Req,
    ) -> CapabilityResult<Resp> {
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .send_json(request)
            .map_err(|e| match e {
                // A non-2xx status is the gateway reporting a model failure.
                ureq::Error::Status(code, response) => CapabilityError::Failed {
                    capability: capability.into(),
                    message: format!(
                        "HTTP {code}: {}",
                        response.into_string().unwrap_or_default()
                    ),
                },
                ureq::Error::Transport(t) => CapabilityError::Transport {
                    capability: capability.into(),
                    message: t.to_string(),
                },
            })?;

        response
            .into_json::<Resp>()
            .map_err(|e| CapabilityError::Malformed {
                capability: capability.into(),
                message: e.to_string(),
            })
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PerceiveRequest<'a> {
    image_path: &'a str,
}

#[derive(Deserialize)]
struct PerceiveResponse {
    #[serde(flatten)]
    output: PerceptionOutput,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Serialize)]
struct LocateRequest<'a> {
    image_path: &'a str,
    query: &'a str,
}

#[derive(Deserialize)]
struct LocateResponse {
    entity: Option<Entity>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    query: &'a str,
    context: &'a Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    logic_query: String,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Serialize)]
struct ReasonRequest<'a> {
    logic_query: &'a str,
    context: &'a Context,
    skip_top: usize,
}

#[derive(Deserialize)]
struct ReasonResponse {
    candidate: Option<Entity>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    candidate: &'a Entity,
    query: &'a str,
    context: &'a Context,
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(flatten)]
    verdict: Verdict,
    #[serde(default)]
    usage: TokenUsage,
}

// ── Adapters ─────────────────────────────────────────────────────────────

pub struct RemotePerceiver(Gateway);

impl Perceiver for RemotePerceiver {
    fn perceive(&self, image: &ImageRef) -> CapabilityResult<Metered<PerceptionOutput>> {
        let response: PerceiveResponse = self.0.post(
            "perception",
            "/perception",
            &PerceiveRequest {
                image_path: &image.0.display().to_string(),
            },
        )?;
        Ok(Metered::new(response.output, response.usage))
    }
}

pub struct RemoteFallbackPerceiver(Gateway);

impl FallbackPerceiver for RemoteFallbackPerceiver {
    fn locate(&self, image: &ImageRef, query: &str) -> CapabilityResult<Metered<Option<Entity>>> {
        let response: LocateResponse = self.0.post(
            "fallback_perception",
            "/perception/fallback",
            &LocateRequest {
                image_path: &image.0.display().to_string(),
                query,
            },
        )?;
        Ok(Metered::new(response.entity, response.usage))
    }
}

pub struct RemoteLogicGenerator(Gateway);

impl LogicGenerator for RemoteLogicGenerator {
    fn generate(
        &self,
        query: &str,
        context: &Context,
        feedback: Option<&str>,
    ) -> CapabilityResult<Metered<String>> {
        let response: GenerateResponse = self.0.post(
            "logic_generation",
            "/logic/generate",
            &GenerateRequest {
                query,
                context,
                feedback,
            },
        )?;
        Ok(Metered::new(response.logic_query, response.usage))
    }
}

pub struct RemoteLogicReasoner(Gateway);

impl LogicReasoner for RemoteLogicReasoner {
    fn reason(
        &self,
        logic_query: &str,
        context: &Context,
        skip_top: usize,
    ) -> CapabilityResult<Metered<Option<Entity>>> {
        let response: ReasonResponse = self.0.post(
            "logic_reasoning",
            "/logic/reason",
            &ReasonRequest {
                logic_query,
                context,
                skip_top,
            },
        )?;
        Ok(Metered::new(response.candidate, response.usage))
    }
}

pub struct RemoteAnswerer(Gateway);

impl Answerer for RemoteAnswerer {
    fn verify(
        &self,
        candidate: &Entity,
        query: &str,
        context: &Context,
    ) -> CapabilityResult<Metered<Verdict>> {
        let response: VerifyResponse = self.0.post(
            "answering",
            "/answer",
            &VerifyRequest {
                candidate,
                query,
                context,
            },
        )?;
        Ok(Metered::new(response.verdict, response.usage))
    }
}
