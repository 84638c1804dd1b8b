// chain.rs — Chain hashing, emission and verification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::signer::{ChainSigner, KeyService};
use crate::sink::AuditSink;

/// Chain hash every workflow's first event links to.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Tip of one workflow's chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainHead {
    /// WAL sequence of the last mirrored entry.
    pub sequence: u64,
    pub chain_hash: String,
}

impl ChainHead {
    pub fn of(event: &AuditEvent) -> Self {
        Self {
            sequence: event.sequence,
            chain_hash: event.chain_hash.clone(),
        }
    }
}

/// Chains, signs and persists audit events.
///
/// Heads are cached per workflow and seeded from the sink on first use, so
/// an emitter opened over an existing log continues its chains.
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
    signer: Option<Arc<dyn ChainSigner>>,
    heads: Mutex<HashMap<String, Option<ChainHead>>>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            signer: None,
            heads: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn ChainSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    /// Current head for a workflow (None before its first event).
    pub fn head(&self, workflow_id: &str) -> Result<Option<ChainHead>, AuditError> {
        let mut heads = self.heads.lock().unwrap_or_else(PoisonError::into_inner);
        self.cached_head(&mut heads, workflow_id)
    }

    /// Chain, sign and persist `event`, returning it as stored.
    ///
    /// Events must arrive in increasing sequence order per workflow; an event
    /// at or below the head is refused with [`AuditError::OutOfOrder`].
    pub fn emit(&self, mut event: AuditEvent) -> Result<AuditEvent, AuditError> {
        let mut heads = self.heads.lock().unwrap_or_else(PoisonError::into_inner);
        let head = self.cached_head(&mut heads, &event.workflow_id)?;

        let previous = match &head {
            Some(head) if event.sequence <= head.sequence => {
                return Err(AuditError::OutOfOrder {
                    event_id: event.event_id.clone(),
                    head: head.sequence,
                    found: event.sequence,
                });
            }
            Some(head) => head.chain_hash.as_str(),
            None => GENESIS_HASH,
        };

        event.chain_hash = event.compute_chain_hash(previous)?;
        if let Some(signer) = &self.signer {
            event.signature = Some(signer.sign(&event.chain_hash)?);
            event.signature_key_ref = Some(signer.key_ref().to_string());
        } else {
            event.signature = None;
            event.signature_key_ref = None;
        }

        self.sink.append(&event)?;
        heads.insert(event.workflow_id.clone(), Some(ChainHead::of(&event)));

        tracing::debug!(
            event_id = %event.event_id,
            severity = %event.severity,
            "audit event emitted"
        );
        Ok(event)
    }

    fn cached_head(
        &self,
        heads: &mut HashMap<String, Option<ChainHead>>,
        workflow_id: &str,
    ) -> Result<Option<ChainHead>, AuditError> {
        if let Some(head) = heads.get(workflow_id) {
            return Ok(head.clone());
        }
        let head = self.sink.head(workflow_id)?;
        heads.insert(workflow_id.to_string(), head.clone());
        Ok(head)
    }
}

/// Recompute every chain hash, workflow by workflow, in the order given.
///
/// Fails on the first event whose stored hash disagrees, naming it.
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), AuditError> {
    let mut previous: HashMap<&str, &str> = HashMap::new();
    for event in events {
        let prev = previous
            .get(event.workflow_id.as_str())
            .copied()
            .unwrap_or(GENESIS_HASH);
        let expected = event.compute_chain_hash(prev)?;
        if expected != event.chain_hash {
            return Err(AuditError::ChainMismatch {
                event_id: event.event_id.clone(),
                expected,
                actual: event.chain_hash.clone(),
            });
        }
        previous.insert(event.workflow_id.as_str(), event.chain_hash.as_str());
    }
    Ok(())
}

/// Check every signed event against `keys`. Returns how many were verified.
pub fn verify_signatures(events: &[AuditEvent], keys: &dyn KeyService) -> Result<usize, AuditError> {
    let mut verified = 0;
    for event in events {
        let (Some(signature), Some(key_ref)) = (&event.signature, &event.signature_key_ref) else {
            continue;
        };
        if !keys.verify(key_ref, &event.chain_hash, signature)? {
            return Err(AuditError::SignatureInvalid {
                event_id: event.event_id.clone(),
                key_ref: key_ref.clone(),
            });
        }
        verified += 1;
    }
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditSeverity;
    use crate::signer::Ed25519Signer;
    use crate::sink::{JsonlAuditSink, MemoryAuditSink};
    use cc_protocol::WorkflowState;
    use chrono::{TimeZone, Utc};

    fn event(workflow_id: &str, sequence: u64) -> AuditEvent {
        AuditEvent::new(
            workflow_id,
            sequence,
            "step_started",
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, sequence as u32).unwrap(),
            WorkflowState::PlanRunning,
        )
        .with_message(format!("event {}", sequence))
    }

    #[test]
    fn first_event_chains_from_genesis() {
        let emitter = AuditEmitter::new(Arc::new(MemoryAuditSink::new()));
        let first = emitter.emit(event("wf-1", 1)).unwrap();
        assert_eq!(first.chain_hash, event("wf-1", 1).compute_chain_hash(GENESIS_HASH).unwrap());
        let second = emitter.emit(event("wf-1", 2)).unwrap();
        assert_eq!(
            second.chain_hash,
            event("wf-1", 2).compute_chain_hash(&first.chain_hash).unwrap()
        );
    }

    #[test]
    fn chains_are_independent_per_workflow() {
        let sink = Arc::new(MemoryAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        emitter.emit(event("wf-a", 1)).unwrap();
        emitter.emit(event("wf-b", 1)).unwrap();
        emitter.emit(event("wf-a", 2)).unwrap();
        assert!(verify_chain(&sink.events()).is_ok());
    }

    #[test]
    fn verification_names_the_tampered_event() {
        let sink = Arc::new(MemoryAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        for seq in 1..=4 {
            emitter.emit(event("wf-1", seq)).unwrap();
        }
        let mut events = sink.events();
        events[2].severity = AuditSeverity::Critical;
        match verify_chain(&events) {
            Err(AuditError::ChainMismatch { event_id, .. }) => assert_eq!(event_id, "wf-1-00000003"),
            other => panic!("expected chain mismatch, got {:?}", other),
        }
    }

    #[test]
    fn removed_event_breaks_the_chain() {
        let sink = Arc::new(MemoryAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        for seq in 1..=3 {
            emitter.emit(event("wf-1", seq)).unwrap();
        }
        let mut events = sink.events();
        events.remove(1);
        assert!(matches!(verify_chain(&events), Err(AuditError::ChainMismatch { .. })));
    }

    #[test]
    fn replayed_sequence_is_refused() {
        let emitter = AuditEmitter::new(Arc::new(MemoryAuditSink::new()));
        emitter.emit(event("wf-1", 1)).unwrap();
        emitter.emit(event("wf-1", 2)).unwrap();
        assert!(matches!(
            emitter.emit(event("wf-1", 2)),
            Err(AuditError::OutOfOrder { head: 2, found: 2, .. })
        ));
    }

    #[test]
    fn identical_inputs_produce_identical_chains() {
        let run = || {
            let sink = Arc::new(MemoryAuditSink::new());
            let emitter = AuditEmitter::new(sink.clone());
            for seq in 1..=5 {
                emitter.emit(event("wf-det", seq)).unwrap();
            }
            sink.events()
                .into_iter()
                .map(|e| e.chain_hash)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn signed_events_verify_through_key_service() {
        let pkcs8 = Ed25519Signer::generate_pkcs8().unwrap();
        let signer = Arc::new(Ed25519Signer::from_pkcs8("local:audit", &pkcs8).unwrap());
        let sink = Arc::new(MemoryAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone()).with_signer(signer.clone());
        emitter.emit(event("wf-s", 1)).unwrap();
        emitter.emit(event("wf-s", 2)).unwrap();

        let mut events = sink.events();
        assert_eq!(events[0].signature_key_ref.as_deref(), Some("local:audit"));
        assert_eq!(verify_signatures(&events, signer.as_ref()).unwrap(), 2);

        events[1].chain_hash = GENESIS_HASH.to_string();
        assert!(matches!(
            verify_signatures(&events, signer.as_ref()),
            Err(AuditError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn emitter_continues_an_existing_jsonl_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let emitter = AuditEmitter::new(Arc::new(JsonlAuditSink::open(&path).unwrap()));
            emitter.emit(event("wf-1", 1)).unwrap();
            emitter.emit(event("wf-1", 2)).unwrap();
        }
        let emitter = AuditEmitter::new(Arc::new(JsonlAuditSink::open(&path).unwrap()));
        assert_eq!(emitter.head("wf-1").unwrap().unwrap().sequence, 2);
        emitter.emit(event("wf-1", 3)).unwrap();

        let events = JsonlAuditSink::read_all(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert!(verify_chain(&events).is_ok());
    }
}
