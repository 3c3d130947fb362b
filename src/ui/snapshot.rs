//! Progress snapshot: a status row with a phase label and item/edge
//! counters fed by start/progress/finish events.

use crate::core::messages::{Cmd, Msg, SnapshotEvent, TaskId};

use super::status::{TaskModel, TaskStatus};

#[derive(Debug, Clone)]
pub struct SnapshotModel {
    task: TaskModel,
    phase: String,
    items: u32,
    edges: u32,
}

impl SnapshotModel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            task: TaskModel::new(title),
            phase: "pending".to_string(),
            items: 0,
            edges: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    pub fn task(&self) -> &TaskModel {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut TaskModel {
        &mut self.task
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn counts(&self) -> (u32, u32) {
        (self.items, self.edges)
    }

    pub fn start(&mut self) -> Option<Cmd> {
        self.task.start()
    }

    /// Apply events addressed to this snapshot; everything else goes to
    /// the embedded task.
    pub fn update(&mut self, msg: &Msg) -> Option<Cmd> {
        match msg {
            Msg::Snapshot { id, event } if *id == self.id() => {
                match event {
                    SnapshotEvent::Start { phase } => {
                        self.phase = phase.clone();
                    }
                    SnapshotEvent::Progress {
                        phase,
                        items,
                        edges,
                    } => {
                        self.phase = phase.clone();
                        self.items = *items;
                        self.edges = *edges;
                    }
                    SnapshotEvent::Finish {
                        phase,
                        items,
                        edges,
                    } => {
                        self.phase = phase.clone();
                        self.items = *items;
                        self.edges = *edges;
                        self.task.finish(true);
                    }
                }
                None
            }
            Msg::Snapshot { .. } => None,
            _ => self.task.update(msg),
        }
    }

    pub fn view(&self) -> String {
        let head = format!("{} - {}", self.task.view(), self.phase);
        match (self.items, self.edges) {
            (0, 0) => head,
            (1, 0) => format!("{}: 1 item", head),
            (1, 1) => format!("{}: 1 item, 1 edge", head),
            (items, 0) if items > 1 => format!("{}: {} items", head, items),
            (items, 1) if items > 1 => format!("{}: {} items, 1 edge", head, items),
            (items, edges) => format!("{}: {} items, {} edges", head, items, edges),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(id: TaskId, items: u32, edges: u32) -> Msg {
        Msg::snapshot(
            id,
            SnapshotEvent::Progress {
                phase: "phase".to_string(),
                items,
                edges,
            },
        )
    }

    #[test]
    fn test_view_table() {
        let mut snap = SnapshotModel::new("X");
        snap.task.skip();
        let id = snap.id();

        let cases = [
            ((0, 0), "-- X - phase"),
            ((1, 0), "-- X - phase: 1 item"),
            ((1, 1), "-- X - phase: 1 item, 1 edge"),
            ((5, 0), "-- X - phase: 5 items"),
            ((5, 1), "-- X - phase: 5 items, 1 edge"),
            ((5, 5), "-- X - phase: 5 items, 5 edges"),
        ];
        for ((items, edges), expected) in cases {
            snap.update(&progress(id, items, edges));
            assert_eq!(snap.view(), expected);
        }
    }

    #[test]
    fn test_zero_items_with_edges_uses_general_form() {
        let mut snap = SnapshotModel::new("X");
        snap.update(&progress(snap.id(), 0, 3));
        assert_eq!(snap.view(), "⏳ X - phase: 0 items, 3 edges");
    }

    #[test]
    fn test_start_keeps_counts() {
        let mut snap = SnapshotModel::new("Starting Change");
        let id = snap.id();
        snap.update(&progress(id, 4, 2));
        snap.update(&Msg::snapshot(
            id,
            SnapshotEvent::Start {
                phase: "starting".to_string(),
            },
        ));
        assert_eq!(snap.phase(), "starting");
        assert_eq!(snap.counts(), (4, 2));
    }

    #[test]
    fn test_finish_marks_done() {
        let mut snap = SnapshotModel::new("Ending Change");
        snap.start();
        snap.update(&Msg::snapshot(
            snap.id(),
            SnapshotEvent::Finish {
                phase: "STATE_DONE".to_string(),
                items: 3,
                edges: 1,
            },
        ));
        assert_eq!(snap.status(), TaskStatus::Done);
        assert_eq!(snap.view(), "✅ Ending Change - STATE_DONE: 3 items, 1 edge");
    }

    #[test]
    fn test_events_for_other_ids_are_ignored() {
        let mut snap = SnapshotModel::new("Starting Change");
        snap.start();
        let before = snap.view();
        let other = TaskId::next();

        snap.update(&progress(other, 9, 9));
        snap.update(&Msg::snapshot(
            other,
            SnapshotEvent::Finish {
                phase: "done".to_string(),
                items: 1,
                edges: 1,
            },
        ));

        assert_eq!(snap.view(), before);
        assert_eq!(snap.status(), TaskStatus::Running);
    }
}
