use serde_json::Value;
use tracing::debug;

use super::dispatcher::CommandDispatcher;
use super::session::DebuggerSession;
use crate::cdp::runtime::{Evaluate, EvaluateResponse};
use crate::error::{NodemarkError, Result};

/// Page-side helper shared by click and fill. Looks the selector up in the
/// document, every open shadow root and every same-origin frame, then
/// performs the action. Answers `false` when nothing matched.
const PAGE_ACTION_FN: &str = r#"function (action, selector, text) {
  function find(root) {
    const direct = root.querySelector(selector);
    if (direct) return direct;
    for (const el of root.querySelectorAll('*')) {
      if (el.shadowRoot) {
        const hit = find(el.shadowRoot);
        if (hit) return hit;
      }
      if (el.tagName === 'IFRAME' || el.tagName === 'FRAME') {
        let doc = null;
        try { doc = el.contentDocument; } catch (e) { doc = null; }
        if (doc) {
          const hit = find(doc);
          if (hit) return hit;
        }
      }
    }
    return null;
  }
  const el = find(document);
  if (!el) return false;
  if (typeof el.scrollIntoView === 'function') {
    el.scrollIntoView({ block: 'center', inline: 'center' });
  }
  if (action === 'click') {
    el.click();
    return true;
  }
  if (action === 'fill') {
    el.focus();
    if (el.isContentEditable) {
      el.textContent = text;
    } else {
      el.value = text;
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
  }
  throw new Error('Unknown page action: ' + action);
}"#;

/// A selector-addressed action run inside the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Click { selector: String },
    Fill { selector: String, text: String },
}

impl PageAction {
    pub fn selector(&self) -> &str {
        match self {
            PageAction::Click { selector } | PageAction::Fill { selector, .. } => selector,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PageAction::Click { .. } => "click",
            PageAction::Fill { .. } => "fill",
        }
    }

    /// Expression that runs this action through `PAGE_ACTION_FN`.
    pub(crate) fn expression(&self) -> String {
        let args = match self {
            PageAction::Click { selector } => serde_json::json!(["click", selector, Value::Null]),
            PageAction::Fill { selector, text } => serde_json::json!(["fill", selector, text]),
        };
        format!("({}).apply(null, {})", PAGE_ACTION_FN, args)
    }

    /// Inverse of [`PageAction::expression`], for hosts that simulate the page.
    pub(crate) fn parse_expression(expression: &str) -> Option<PageAction> {
        let args = expression
            .strip_prefix('(')?
            .strip_prefix(PAGE_ACTION_FN)?
            .strip_prefix(").apply(null, ")?
            .strip_suffix(')')?;
        let args: Vec<Value> = serde_json::from_str(args).ok()?;
        let selector = args.get(1)?.as_str()?.to_string();
        match args.first()?.as_str()? {
            "click" => Some(PageAction::Click { selector }),
            "fill" => Some(PageAction::Fill {
                selector,
                text: args.get(2)?.as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

/// Click, fill and evaluate inside the attached page.
pub struct PageInteraction<'a> {
    dispatcher: &'a CommandDispatcher,
}

impl<'a> PageInteraction<'a> {
    pub fn new(dispatcher: &'a CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn click(&self, session: &DebuggerSession, selector: &str) -> Result<()> {
        self.run(
            session,
            PageAction::Click {
                selector: selector.to_string(),
            },
        )
        .await
    }

    pub async fn fill(&self, session: &DebuggerSession, selector: &str, text: &str) -> Result<()> {
        self.run(
            session,
            PageAction::Fill {
                selector: selector.to_string(),
                text: text.to_string(),
            },
        )
        .await
    }

    /// Run `script` in the page's main world with a user gesture. This is
    /// ordinary page privilege, not a sandbox. The script's value is dropped.
    pub async fn evaluate(&self, session: &DebuggerSession, script: &str) -> Result<()> {
        debug!(tab = %session.tab(), "Evaluating script");
        let response = self
            .dispatcher
            .send(
                session,
                Evaluate {
                    expression: script.to_string(),
                    user_gesture: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        check_exception(&response)
    }

    pub async fn run(&self, session: &DebuggerSession, action: PageAction) -> Result<()> {
        debug!(
            tab = %session.tab(),
            action = action.name(),
            selector = action.selector(),
            "Running page action"
        );
        let response = self
            .dispatcher
            .send(
                session,
                Evaluate {
                    expression: action.expression(),
                    return_by_value: Some(true),
                    user_gesture: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        check_exception(&response)?;

        match response.result.value {
            Some(Value::Bool(true)) => Ok(()),
            Some(Value::Bool(false)) => Err(NodemarkError::ElementNotFound(
                action.selector().to_string(),
            )),
            other => Err(NodemarkError::JavaScriptError(format!(
                "Unexpected {} result: {}",
                action.name(),
                other.unwrap_or(Value::Null)
            ))),
        }
    }
}

fn check_exception(response: &EvaluateResponse) -> Result<()> {
    match &response.exception_details {
        Some(details) => Err(NodemarkError::JavaScriptError(details.message())),
        None => Ok(()),
    }
}
