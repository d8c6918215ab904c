//! Timed, hierarchical event log for a test run.
//!
//! Every call writes the same entry to two sinks: the remote trace
//! store (hierarchical, via [`TraceStore`]) and a console stream
//! (linear, indented by group depth). The remote append is issued and
//! awaited first, then the console line is written; the two sinks are
//! not atomic, but any prefix of the run renders structurally
//! isomorphic in both.
//!
//! Nesting is tracked by a scope stack rather than explicit parent
//! handles: `group` pushes a scope, `group_end` pops it and writes the
//! elapsed duration onto the group's entry. Callers are responsible for
//! balancing the pairs; popping the root scope is a programming defect
//! and panics.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use console::style;

use berth_state::{EntryStyle, StorageResult, TraceEntry, TraceHandle, TraceStore};

use crate::commit::CommitRef;

/// One nesting level of the log. The top of the stack is the innermost
/// active group.
struct LogScope {
    /// Remote handle of this scope's entry list.
    handle: TraceHandle,
    /// Seconds since run start when the scope opened.
    start_offset: f64,
}

/// Tracks events occurring during a test run.
///
/// Emits entries to the console stream as well as to the trace store.
pub struct EventLog {
    console: Box<dyn Write + Send>,
    store: Arc<dyn TraceStore>,
    /// Rendered commit label, captured at open time.
    label: String,
    /// Scope stack; index 0 is the root scope and is never popped.
    scopes: Vec<LogScope>,
    started: Instant,
}

impl EventLog {
    /// Open the log for one run: clears any previous trace under `root`
    /// and seats the root scope at offset zero.
    pub async fn open(
        console: Box<dyn Write + Send>,
        commit: &CommitRef,
        store: Arc<dyn TraceStore>,
        root: TraceHandle,
    ) -> StorageResult<Self> {
        store.clear(&root).await?;
        Ok(EventLog {
            console,
            store,
            label: commit.display_label(),
            scopes: vec![LogScope {
                handle: root,
                start_offset: 0.0,
            }],
            started: Instant::now(),
        })
    }

    /// Seconds since the run started.
    pub fn delta(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Current nesting depth; 1 means only the root scope is open.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Append a plain entry to the current scope.
    pub async fn info(&mut self, line: &str) -> StorageResult<()> {
        let delta = self.delta();
        self.push_entry(EntryStyle::Info, line, delta).await?;
        Ok(())
    }

    /// Append a group entry and open its scope; subsequent entries land
    /// under it until the matching [`group_end`](Self::group_end).
    pub async fn group(&mut self, line: &str) -> StorageResult<()> {
        let delta = self.delta();
        let handle = self.push_entry(EntryStyle::Group, line, delta).await?;
        self.scopes.push(LogScope {
            handle,
            start_offset: delta,
        });
        Ok(())
    }

    /// Close the innermost group: writes a blank console line for
    /// spacing (no remote entry), pops the scope, and records the
    /// group's duration on its entry.
    ///
    /// # Panics
    ///
    /// Panics if called with no group open — an unmatched `group_end`
    /// is a defect in the calling step sequence, not a runtime error.
    pub async fn group_end(&mut self) -> StorageResult<()> {
        assert!(
            self.scopes.len() > 1,
            "group_end called with no open group"
        );
        let delta = self.delta();
        self.console_line(EntryStyle::Info, "", delta);
        let closed = self.scopes.pop().expect("stack has more than one scope");
        self.store
            .set_duration(&closed.handle, delta - closed.start_offset)
            .await
    }

    /// Append an error entry to the current scope.
    pub async fn error(&mut self, line: &str) -> StorageResult<()> {
        let delta = self.delta();
        self.push_entry(EntryStyle::Error, line, delta).await?;
        Ok(())
    }

    /// Like [`error`](Self::error), with the error's full cause chain
    /// appended as a trailing segment.
    pub async fn fatal(
        &mut self,
        err: &(dyn std::error::Error + 'static),
        line: &str,
    ) -> StorageResult<()> {
        let full = if line.is_empty() {
            error_chain(err)
        } else {
            format!("{line} {}", error_chain(err))
        };
        self.error(&full).await
    }

    async fn push_entry(
        &mut self,
        entry_style: EntryStyle,
        line: &str,
        delta: f64,
    ) -> StorageResult<TraceHandle> {
        let scope = self.scopes.last().expect("log scope stack is never empty");
        let handle = self
            .store
            .append(
                &scope.handle,
                TraceEntry {
                    delta,
                    line: line.to_string(),
                    style: entry_style,
                },
            )
            .await?;
        self.console_line(entry_style, line, delta);
        Ok(handle)
    }

    fn console_line(&mut self, entry_style: EntryStyle, line: &str, delta: f64) {
        let indent = "  ".repeat(self.scopes.len() - 1);
        let prefix = format!("{} {delta:7.3}s: {indent}", self.label);
        let rendered = match entry_style {
            EntryStyle::Info => line.to_string(),
            EntryStyle::Group => style(line).underlined().to_string(),
            EntryStyle::Error => style(line).red().to_string(),
        };
        // A console stream that has gone away should not abort the run.
        let _ = writeln!(self.console, "{}{rendered}", style(prefix).dim());
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    rendered
}
