use std::io::{self, Write};

use crate::core::message::{ConversationTurn, TurnId};
use crate::core::store::{StoreEvent, StoreObserver};

/// Prints assistant replies to a writer as they stream in.
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn render(&mut self, event: &StoreEvent, turns: &[ConversationTurn]) -> io::Result<()> {
        let find = |id: &TurnId| turns.iter().find(|turn| &turn.id == id);
        match event {
            StoreEvent::TurnAppended(id) => {
                if let Some(turn) = find(id).filter(|turn| turn.is_assistant()) {
                    let model = turn.model_id.as_deref().unwrap_or("assistant");
                    writeln!(self.out, "{model} | {}", turn.created_at.format("%H:%M:%S"))?;
                }
            }
            StoreEvent::FragmentApplied { fragment, .. } => write!(self.out, "{fragment}")?,
            StoreEvent::TurnFinalized(_) => writeln!(self.out, "\n")?,
            StoreEvent::TurnFailed(id) => {
                if let Some(turn) = find(id) {
                    writeln!(self.out, "\n{}\n", turn.content)?;
                }
            }
            StoreEvent::Reset => writeln!(self.out, "Started a new conversation.\n")?,
        }
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> StoreObserver for TerminalRenderer<W> {
    fn on_event(&mut self, event: &StoreEvent, turns: &[ConversationTurn]) {
        let _ = self.render(event, turns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fragments_inline_and_failures_on_their_own_line() {
        let mut renderer = TerminalRenderer::new(Vec::new());
        let mut turns = vec![ConversationTurn::user(TurnId::new("u"), "Hi")];
        renderer.on_event(&StoreEvent::TurnAppended(TurnId::new("u")), &turns);

        let id = TurnId::new("a");
        let mut reply = ConversationTurn::pending_assistant(id.clone(), "m1");
        turns.push(reply.clone());
        renderer.on_event(&StoreEvent::TurnAppended(id.clone()), &turns);
        for fragment in ["He", "llo"] {
            renderer.on_event(
                &StoreEvent::FragmentApplied {
                    id: id.clone(),
                    fragment: fragment.into(),
                },
                &turns,
            );
        }
        reply.content = "Sorry".into();
        turns[1] = reply;
        renderer.on_event(&StoreEvent::TurnFailed(id), &turns);

        let output = String::from_utf8(renderer.into_inner()).expect("utf8");
        let header = format!("m1 | {}\n", turns[1].created_at.format("%H:%M:%S"));
        assert_eq!(output, format!("{header}Hello\nSorry\n\n"));
    }
}
