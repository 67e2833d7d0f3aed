//! Jump routing for control flow.
//!
//! This module tracks the loops and `finally`-style regions that enclose the
//! instruction being emitted, so `break`, `continue` and `return` can leave
//! them correctly. A jump that crosses a region records a pending-action
//! code in that region and branches to its normal exit; the region runs its
//! cleanup and then re-routes the action from its own position.

use pyrite_core::{CompileError, Result, Span};

/// A non-local control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpKind {
    Break,
    Continue,
    Return,
}

impl JumpKind {
    /// Pending-action code stored while a cleanup region runs. `0` means none.
    pub fn code(self) -> i32 {
        match self {
            JumpKind::Break => 1,
            JumpKind::Continue => 2,
            JumpKind::Return => 3,
        }
    }
}

/// How to perform a jump from the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Branch straight to a label.
    Branch(String),
    /// Store `code` in `pending` and branch to the region's normal exit.
    ViaCleanup {
        pending: String,
        code: i32,
        entry: String,
    },
    /// Return from the function.
    Return,
}

#[derive(Debug)]
enum Frame {
    Loop {
        break_label: String,
        continue_label: String,
    },
    Cleanup {
        pending: String,
        entry: String,
        kinds: Vec<JumpKind>,
    },
}

/// Stack of enclosing loops and cleanup regions (innermost last).
#[derive(Debug, Default)]
pub struct JumpStack {
    frames: Vec<Frame>,
}

impl JumpStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a loop.
    pub fn push_loop(&mut self, break_label: impl Into<String>, continue_label: impl Into<String>) {
        self.frames.push(Frame::Loop {
            break_label: break_label.into(),
            continue_label: continue_label.into(),
        });
    }

    /// Exit the innermost loop.
    pub fn pop_loop(&mut self, span: Span) -> Result<()> {
        match self.frames.pop() {
            Some(Frame::Loop { .. }) => Ok(()),
            _ => Err(CompileError::internal("unbalanced loop exit", span)),
        }
    }

    /// Enter a cleanup region (`finally` body or `with` exit).
    ///
    /// `pending` is the `i32` local holding the action code, `entry` the label
    /// whose end starts the region's normal exit path.
    pub fn push_cleanup(&mut self, pending: impl Into<String>, entry: impl Into<String>) {
        self.frames.push(Frame::Cleanup {
            pending: pending.into(),
            entry: entry.into(),
            kinds: Vec::new(),
        });
    }

    /// Exit the innermost cleanup region.
    ///
    /// Returns the jump kinds routed through it, which the caller must
    /// dispatch after the cleanup code.
    pub fn pop_cleanup(&mut self, span: Span) -> Result<Vec<JumpKind>> {
        match self.frames.pop() {
            Some(Frame::Cleanup { kinds, .. }) => Ok(kinds),
            _ => Err(CompileError::internal("unbalanced cleanup region exit", span)),
        }
    }

    /// Whether a `break`/`continue` target exists.
    pub fn in_loop(&self) -> bool {
        self.frames.iter().any(|f| matches!(f, Frame::Loop { .. }))
    }

    /// Whether any cleanup region encloses the current position.
    pub fn in_cleanup(&self) -> bool {
        self.frames.iter().any(|f| matches!(f, Frame::Cleanup { .. }))
    }

    /// Route a jump from the current position.
    ///
    /// Returns `None` for `break`/`continue` outside any loop.
    pub fn route(&mut self, kind: JumpKind) -> Option<Route> {
        if kind != JumpKind::Return && !self.in_loop() {
            return None;
        }
        for frame in self.frames.iter_mut().rev() {
            match frame {
                Frame::Cleanup {
                    pending,
                    entry,
                    kinds,
                } => {
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                    return Some(Route::ViaCleanup {
                        pending: pending.clone(),
                        code: kind.code(),
                        entry: entry.clone(),
                    });
                }
                Frame::Loop {
                    break_label,
                    continue_label,
                } => match kind {
                    JumpKind::Break => return Some(Route::Branch(break_label.clone())),
                    JumpKind::Continue => return Some(Route::Branch(continue_label.clone())),
                    JumpKind::Return => {}
                },
            }
        }
        Some(Route::Return)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_outside_loop() {
        let mut jumps = JumpStack::new();
        assert_eq!(jumps.route(JumpKind::Break), None);
        assert_eq!(jumps.route(JumpKind::Return), Some(Route::Return));
    }

    #[test]
    fn nested_loops_target_innermost() {
        let mut jumps = JumpStack::new();
        jumps.push_loop("$exit_1", "$top_1");
        jumps.push_loop("$exit_2", "$top_2");
        assert_eq!(
            jumps.route(JumpKind::Continue),
            Some(Route::Branch("$top_2".into()))
        );
        jumps.pop_loop(Span::default()).unwrap();
        assert_eq!(
            jumps.route(JumpKind::Break),
            Some(Route::Branch("$exit_1".into()))
        );
    }

    #[test]
    fn jumps_cross_cleanup_regions() {
        let mut jumps = JumpStack::new();
        jumps.push_loop("$exit", "$top");
        jumps.push_cleanup("$pending_3", "$fin_norm_3");
        let route = jumps.route(JumpKind::Break).unwrap();
        assert_eq!(
            route,
            Route::ViaCleanup {
                pending: "$pending_3".into(),
                code: 1,
                entry: "$fin_norm_3".into()
            }
        );
        jumps.route(JumpKind::Return);
        jumps.route(JumpKind::Break);
        let kinds = jumps.pop_cleanup(Span::default()).unwrap();
        assert_eq!(kinds, vec![JumpKind::Break, JumpKind::Return]);
        // After the region, the loop is reached directly.
        assert_eq!(
            jumps.route(JumpKind::Break),
            Some(Route::Branch("$exit".into()))
        );
    }

    #[test]
    fn unbalanced_pop_is_internal_error() {
        let mut jumps = JumpStack::new();
        jumps.push_cleanup("$p", "$e");
        let err = jumps.pop_loop(Span::new(1, 1)).unwrap_err();
        assert_eq!(err.kind(), pyrite_core::ErrorKind::InternalInvariant);
    }
}
