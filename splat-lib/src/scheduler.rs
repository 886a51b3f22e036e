//! Coalescing of sort requests: at most one sort in flight, latest view wins.

use crate::structures::ViewProj;

/// One requested camera snapshot. Every request is a distinct snapshot, even
/// when its matrix equals an earlier one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRequest {
    pub view: ViewProj,
    pub max_splats: Option<usize>,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A sort against the snapshot with this generation is running.
    Sorting { generation: u64 },
}

#[derive(Debug)]
pub struct SortScheduler {
    state: SchedulerState,
    latest: Option<ViewRequest>,
    next_generation: u64,
}

impl Default for SortScheduler {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            latest: None,
            next_generation: 0,
        }
    }
}

impl SortScheduler {
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn latest(&self) -> Option<&ViewRequest> {
        self.latest.as_ref()
    }

    /// Records `view` as the latest snapshot. Returns the request to sort now
    /// when idle; while sorting, the request only replaces any pending one.
    pub fn request_sort(&mut self, view: ViewProj, max_splats: Option<usize>) -> Option<ViewRequest> {
        let request = ViewRequest {
            view,
            max_splats,
            generation: self.next_generation,
        };
        self.next_generation += 1;
        self.latest = Some(request);

        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::Sorting {
                    generation: request.generation,
                };
                Some(request)
            }
            SchedulerState::Sorting { .. } => None,
        }
    }

    /// Continuation after a sort completes. Returns the newest snapshot if one
    /// arrived meanwhile and stays in `Sorting`; otherwise goes idle.
    pub fn sort_finished(&mut self) -> Option<ViewRequest> {
        let SchedulerState::Sorting { generation } = self.state else {
            return None;
        };
        match self.latest {
            Some(latest) if latest.generation != generation => {
                self.state = SchedulerState::Sorting {
                    generation: latest.generation,
                };
                Some(latest)
            }
            _ => {
                self.state = SchedulerState::Idle;
                None
            }
        }
    }
}
