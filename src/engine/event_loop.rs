//! Task and microtask queues
//!
//! A task is one unit of engine work. After every task the loop performs
//! a microtask checkpoint and then ends the active window of every
//! transaction created or activated during that task. The window is what
//! makes a transaction accept requests, so this boundary is observable.

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::error::IdbError;

use super::{RequestId, Shared, TransactionId};

/// Deferred embedder work
pub(crate) type Callback = Box<dyn FnOnce()>;

/// A unit of work on the task queue
pub(crate) enum Task {
    /// Run the next queued request of a transaction
    ProcessTransaction(TransactionId),
    /// Fire `complete` and release the transaction's scope
    FinishCommit(TransactionId),
    /// Fire `error` at the aborted requests, then `abort`
    FinishAbort(TransactionId, Vec<RequestId>),
    /// Abort raised outside of request processing
    AbortTransaction(TransactionId, IdbError),
    /// Advance the open/delete queue of a database name
    PumpOpenQueue(String),
    Callback(Callback),
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::ProcessTransaction(_) => "process_transaction",
            Task::FinishCommit(_) => "finish_commit",
            Task::FinishAbort(..) => "finish_abort",
            Task::AbortTransaction(..) => "abort_transaction",
            Task::PumpOpenQueue(_) => "pump_open_queue",
            Task::Callback(_) => "callback",
        }
    }
}

/// Queues driven by `run_until_idle`
#[derive(Default)]
pub(crate) struct EventLoop {
    tasks: VecDeque<Task>,
    microtasks: VecDeque<Callback>,
    /// Transactions whose active window closes at the end of this task
    deactivate: Vec<TransactionId>,
    running: bool,
}

impl EventLoop {
    pub(crate) fn take_all(&mut self) -> (VecDeque<Task>, VecDeque<Callback>) {
        (
            std::mem::take(&mut self.tasks),
            std::mem::take(&mut self.microtasks),
        )
    }
}

impl Shared {
    pub(crate) fn queue_task(&self, task: Task) {
        self.event_loop.borrow_mut().tasks.push_back(task);
    }

    pub(crate) fn queue_microtask(&self, callback: Callback) {
        self.event_loop.borrow_mut().microtasks.push_back(callback);
    }

    /// Close `txn`'s active window when the current task ends
    pub(crate) fn deactivate_at_end_of_task(&self, txn: TransactionId) {
        self.event_loop.borrow_mut().deactivate.push(txn);
    }

    pub(crate) fn perform_microtask_checkpoint(&self) {
        loop {
            let next = self.event_loop.borrow_mut().microtasks.pop_front();
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    /// Microtask checkpoint, then close the active windows of this task
    pub(crate) fn end_of_task(&self) {
        self.perform_microtask_checkpoint();
        let expiring = std::mem::take(&mut self.event_loop.borrow_mut().deactivate);
        for txn in expiring {
            if let Some(record) = self.state.borrow_mut().transactions.get_mut(&txn) {
                record.active = false;
            }
            self.maybe_commit(txn);
        }
        self.collect_released();
    }

    /// Run tasks until none are left, returning how many ran
    pub(crate) fn run_until_idle(&self) -> usize {
        {
            let mut event_loop = self.event_loop.borrow_mut();
            if event_loop.running {
                warn!("run_until_idle called from inside a task; ignoring");
                return 0;
            }
            event_loop.running = true;
        }

        // Work done before the loop started counts as one task
        self.end_of_task();

        let mut ran = 0;
        loop {
            if ran >= self.config.max_tasks_per_run {
                warn!(budget = self.config.max_tasks_per_run, "task budget exhausted");
                break;
            }
            let next = self.event_loop.borrow_mut().tasks.pop_front();
            let Some(task) = next else {
                break;
            };
            trace!(task = task.name(), "running task");
            self.run_task(task);
            self.end_of_task();
            ran += 1;
        }

        self.event_loop.borrow_mut().running = false;
        ran
    }

    fn run_task(&self, task: Task) {
        match task {
            Task::ProcessTransaction(txn) => self.process_transaction(txn),
            Task::FinishCommit(txn) => self.finish_commit(txn),
            Task::FinishAbort(txn, requests) => self.finish_abort(txn, requests),
            Task::AbortTransaction(txn, error) => self.abort_transaction(txn, Some(error)),
            Task::PumpOpenQueue(name) => self.pump_open_queue(&name),
            Task::Callback(callback) => callback(),
        }
    }
}
