//! The per-connection pushdown automaton.
//!
//! Each connection carries an ordered stack of handler frames; the top frame
//! is the only thing that receives input. A consumer reacts to a line by
//! returning stack operations, which dispatch applies in order once the
//! consumer returns — so a single input line can walk through several
//! transitions (pop the executing frame, push a sub-dialog, close) before
//! control goes back to the transport.

use bytes::Bytes;
use tracing::error;

use crate::conn::Conn;
use crate::registry::Registry;

/// One level of the input automaton: an input consumer paired with a prompt
/// producer and a coarse state label.
pub trait Handler: Send {
    fn label(&self) -> &'static str;

    /// React to one input line. Operations returned are applied top-down
    /// after the call, with the executing frame back on top — `Pop` as the
    /// first op removes the executing frame itself.
    fn consume(&mut self, conn: &mut Conn, reg: &Registry, line: &str) -> Vec<StackOp>;

    /// Produce the prompt shown while this frame is on top. Pure: the gate
    /// decides when it is emitted.
    fn prompt(&self, conn: &Conn, reg: &Registry) -> Bytes;

    /// True for frames that read secrets; the gate suppresses remote echo
    /// while such a frame is on top and restores it the moment it is not,
    /// so no exit path can leave a terminal with echo stuck off.
    fn squelch_input(&self) -> bool {
        false
    }
}

pub enum StackOp {
    Push(Box<dyn Handler>),
    Pop,
    /// Pop everything and terminate the transport.
    Close,
}

/// Deliver one line to the top frame and apply the resulting transitions,
/// then run the prompt gate.
///
/// A panicking consumer must not corrupt the stack: the frame that was
/// executing stays on top, the fault is logged, and the connection survives.
pub fn dispatch(conn: &mut Conn, reg: &Registry, line: &str) {
    let Some(mut frame) = conn.stack.pop() else {
        error!(conn = conn.id(), "dispatch on a connection with no frames");
        conn.close();
        return;
    };

    let ops = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        frame.consume(conn, reg, line)
    }));

    // The executing frame goes back on top before ops apply; see `consume`.
    let label = frame.label();
    conn.stack.push(frame);

    match ops {
        Ok(ops) => apply_ops(conn, ops),
        Err(_) => {
            error!(conn = conn.id(), label, "handler fault during dispatch");
        }
    }

    if conn.stack.is_empty() && !conn.is_closed() {
        // Every pop-to-empty in the flows is paired with a push; reaching
        // here means a handler broke that contract.
        error!(conn = conn.id(), "handler stack emptied without close");
        conn.close();
    }

    bust_prompt(conn, reg);
}

fn apply_ops(conn: &mut Conn, ops: Vec<StackOp>) {
    for op in ops {
        if conn.is_closed() {
            return;
        }
        match op {
            // Raw pop: transiently empty mid-batch is fine, dispatch checks
            // the invariant once the batch is done.
            StackOp::Pop => {
                conn.stack.pop();
            }
            StackOp::Push(f) => conn.stack.push(f),
            StackOp::Close => conn.close(),
        }
    }
}

/// The prompt/output gate. Runs after every dispatch and after any
/// asynchronous event that touched the stack: re-emits the current top
/// frame's prompt iff the connection is still open, so the user always has
/// a cue and never sees a prompt for a frame that is already gone.
pub fn bust_prompt(conn: &mut Conn, reg: &Registry) {
    if conn.is_closed() {
        return;
    }
    let Some(frame) = conn.stack.last() else {
        return;
    };
    let squelch = frame.squelch_input();
    let prompt = frame.prompt(conn, reg);
    conn.set_echo_suppressed(squelch);
    conn.send_raw(&prompt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::net::IpAddr;

    fn test_registry() -> Registry {
        let dir = std::env::temp_dir().join(format!(
            "gatekeeper-stack-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        Registry::open(dir.join("accounts.json"), dir.join("players"))
    }

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    struct Echo {
        label: &'static str,
        ops: Option<Vec<StackOp>>,
    }

    impl Handler for Echo {
        fn label(&self) -> &'static str {
            self.label
        }
        fn consume(&mut self, conn: &mut Conn, _reg: &Registry, line: &str) -> Vec<StackOp> {
            conn.send(line);
            self.ops.take().unwrap_or_default()
        }
        fn prompt(&self, _conn: &Conn, _reg: &Registry) -> Bytes {
            Bytes::from(format!("{}> ", self.label))
        }
    }

    struct Panicker;
    impl Handler for Panicker {
        fn label(&self) -> &'static str {
            "boom"
        }
        fn consume(&mut self, _c: &mut Conn, _r: &Registry, _l: &str) -> Vec<StackOp> {
            panic!("handler bug");
        }
        fn prompt(&self, _c: &Conn, _r: &Registry) -> Bytes {
            Bytes::from_static(b"boom> ")
        }
    }

    #[test]
    fn pop_never_empties_the_stack() {
        let mut c = Conn::new(ip());
        c.push(Box::new(Echo {
            label: "only",
            ops: None,
        }));
        c.pop();
        assert_eq!(c.stack_depth(), 1);
        assert_eq!(c.label(), "only");
    }

    #[test]
    fn dispatch_goes_to_top_frame_only() {
        let reg = test_registry();
        let mut c = Conn::new(ip());
        c.push(Box::new(Echo {
            label: "bottom",
            ops: None,
        }));
        c.push(Box::new(Echo {
            label: "top",
            ops: None,
        }));

        dispatch(&mut c, &reg, "hi");
        let out = c.take_output();
        let s = String::from_utf8_lossy(&out);
        assert!(s.starts_with("hi\r\n"));
        assert!(s.ends_with("top> "));
    }

    #[test]
    fn pop_then_push_replaces_the_executing_frame() {
        let reg = test_registry();
        let mut c = Conn::new(ip());
        c.push(Box::new(Echo {
            label: "old",
            ops: Some(vec![
                StackOp::Pop,
                StackOp::Push(Box::new(Echo {
                    label: "new",
                    ops: None,
                })),
            ]),
        }));

        dispatch(&mut c, &reg, "go");
        assert_eq!(c.label(), "new");
        assert_eq!(c.stack_depth(), 1);
        assert!(!c.is_closed());
    }

    #[test]
    fn close_op_terminates_and_suppresses_prompt() {
        let reg = test_registry();
        let mut c = Conn::new(ip());
        c.push(Box::new(Echo {
            label: "menu",
            ops: Some(vec![StackOp::Close]),
        }));

        dispatch(&mut c, &reg, "quit");
        assert!(c.is_closed());
        let out = c.take_output();
        assert!(!String::from_utf8_lossy(&out).contains("menu> "));
    }

    #[test]
    fn panicking_handler_leaves_stack_intact() {
        let reg = test_registry();
        let mut c = Conn::new(ip());
        c.push(Box::new(Echo {
            label: "base",
            ops: None,
        }));
        c.push(Box::new(Panicker));

        dispatch(&mut c, &reg, "anything");
        assert!(!c.is_closed());
        assert_eq!(c.label(), "boom");
        assert_eq!(c.stack_depth(), 2);
    }

    #[test]
    fn prompt_gate_shows_new_top_after_async_pop() {
        let reg = test_registry();
        let mut c = Conn::new(ip());
        c.push(Box::new(Echo {
            label: "menu",
            ops: None,
        }));
        c.push(Box::new(Echo {
            label: "wait",
            ops: None,
        }));

        // An async event pops the wait frame outside normal dispatch...
        c.pop();
        bust_prompt(&mut c, &reg);
        let out = c.take_output();
        assert!(String::from_utf8_lossy(&out).ends_with("menu> "));
    }
}
