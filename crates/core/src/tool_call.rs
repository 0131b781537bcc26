use crate::error::AdapterError;
use crate::generic_types::FunctionCall;
use serde_json::Value;

/// Accumulates one streamed function call.
///
/// Providers stream a call's arguments as text fragments and then send a
/// completion event. Name and call id are latched from the first event that
/// carries them. Only one call is tracked at a time.
#[derive(Debug, Default)]
pub struct PendingFunctionCall {
    name: Option<String>,
    call_id: Option<String>,
    args_text: String,
    saw_delta: bool,
}

impl PendingFunctionCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument fragment.
    pub fn push_delta(&mut self, delta: &str, name: Option<&str>, call_id: Option<&str>) {
        self.latch(name, call_id);
        self.args_text.push_str(delta);
        self.saw_delta = true;
    }

    /// Completes the call and resets the accumulator, whatever the outcome.
    ///
    /// `arguments` is the full argument text some providers repeat on the
    /// completion event; it is used only when no fragments were streamed.
    /// Empty argument text parses as `{}`.
    pub fn finish(
        &mut self,
        name: Option<&str>,
        call_id: Option<&str>,
        arguments: Option<&str>,
    ) -> Result<FunctionCall, AdapterError> {
        self.latch(name, call_id);
        let pending = std::mem::take(self);

        let text = if pending.saw_delta {
            pending.args_text
        } else {
            arguments.unwrap_or_default().to_owned()
        };
        let args = if text.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&text).map_err(|e| {
                AdapterError::ProtocolParse(format!("function call arguments: {e}"))
            })?
        };

        let name = pending
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AdapterError::ProtocolParse("function call without a name".into()))?;

        Ok(FunctionCall {
            name,
            args,
            id: pending.call_id.unwrap_or_default(),
        })
    }

    /// True while fragments or identity are held for an unfinished call.
    pub fn is_active(&self) -> bool {
        self.saw_delta || self.name.is_some() || self.call_id.is_some()
    }

    fn latch(&mut self, name: Option<&str>, call_id: Option<&str>) {
        if self.name.is_none() {
            self.name = name.filter(|n| !n.is_empty()).map(str::to_owned);
        }
        if self.call_id.is_none() {
            self.call_id = call_id.filter(|id| !id.is_empty()).map(str::to_owned);
        }
    }
}
