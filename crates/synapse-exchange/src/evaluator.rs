// SPDX-License-Identifier: MIT OR Apache-2.0
//! The advisory code evaluator invoked on `"coding"` submissions (§4.3, §6).
//!
//! The evaluator is explicitly out of scope as a *collaborator contract*:
//! a real deployment can plug in an LLM-backed reviewer or a sandboxed test
//! runner. What the exchange owns is that its verdict is advisory only — it
//! attaches `auto_verify` evidence and never itself settles a job.

use synapse_core::job::AutoVerifyResult;
use synapse_core::Job;

/// An external collaborator that advises on whether a `"coding"`
/// submission looks correct.
///
/// Implementations must be deterministic and time-bounded: this is called
/// synchronously inside a state-machine transition and must never execute
/// untrusted code.
pub trait CodeEvaluator: Send + Sync {
    /// Judge a submitted result for the given job.
    fn evaluate(&self, job: &Job, result: &str) -> AutoVerifyResult;
}

/// Default evaluator: checks for the presence of a required keyword.
///
/// This is the simplest possible advisory signal that satisfies "never
/// executes untrusted code" — it is a substring match, not a sandboxed
/// interpreter. A job without `payload.requiredKeyword` always passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordEvaluator;

impl CodeEvaluator for KeywordEvaluator {
    fn evaluate(&self, job: &Job, result: &str) -> AutoVerifyResult {
        match &job.payload.required_keyword {
            Some(keyword) if !result.contains(keyword.as_str()) => AutoVerifyResult {
                ok: false,
                reason: Some(format!("result does not contain required keyword {keyword:?}")),
            },
            _ => AutoVerifyResult {
                ok: true,
                reason: None,
            },
        }
    }
}
