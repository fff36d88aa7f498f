/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which runs user-registered and default logging handlers for every
//! published [event](crate::events::Event).

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) compile_block_handlers: Vec<HandlerPtr<CompileBlockEvent>>,
    pub(crate) toss_sibling_handlers: Vec<HandlerPtr<TossSiblingEvent>>,
    pub(crate) execute_script_handlers: Vec<HandlerPtr<ExecuteScriptEvent>>,
    pub(crate) commit_sector_update_handlers: Vec<HandlerPtr<CommitSectorUpdateEvent>>,
    pub(crate) drop_sector_update_handlers: Vec<HandlerPtr<DropSectorUpdateEvent>>,
    pub(crate) new_signed_update_handlers: Vec<HandlerPtr<NewSignedUpdateEvent>>,
    pub(crate) receive_signed_update_handlers: Vec<HandlerPtr<ReceiveSignedUpdateEvent>>,
    pub(crate) reject_signed_update_handlers: Vec<HandlerPtr<RejectSignedUpdateEvent>>,
    pub(crate) start_repair_handlers: Vec<HandlerPtr<StartRepairEvent>>,
    pub(crate) end_repair_handlers: Vec<HandlerPtr<EndRepairEvent>>,
}

impl EventHandlers {
    /// Collect the user's handlers, preceded by the default logger of each event type if
    /// `log_events` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        compile_block_handler: Option<HandlerPtr<CompileBlockEvent>>,
        toss_sibling_handler: Option<HandlerPtr<TossSiblingEvent>>,
        execute_script_handler: Option<HandlerPtr<ExecuteScriptEvent>>,
        commit_sector_update_handler: Option<HandlerPtr<CommitSectorUpdateEvent>>,
        drop_sector_update_handler: Option<HandlerPtr<DropSectorUpdateEvent>>,
        new_signed_update_handler: Option<HandlerPtr<NewSignedUpdateEvent>>,
        receive_signed_update_handler: Option<HandlerPtr<ReceiveSignedUpdateEvent>>,
        reject_signed_update_handler: Option<HandlerPtr<RejectSignedUpdateEvent>>,
        start_repair_handler: Option<HandlerPtr<StartRepairEvent>>,
        end_repair_handler: Option<HandlerPtr<EndRepairEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            compile_block_handlers: handlers_of(log_events, compile_block_handler),
            toss_sibling_handlers: handlers_of(log_events, toss_sibling_handler),
            execute_script_handlers: handlers_of(log_events, execute_script_handler),
            commit_sector_update_handlers: handlers_of(log_events, commit_sector_update_handler),
            drop_sector_update_handlers: handlers_of(log_events, drop_sector_update_handler),
            new_signed_update_handlers: handlers_of(log_events, new_signed_update_handler),
            receive_signed_update_handlers: handlers_of(log_events, receive_signed_update_handler),
            reject_signed_update_handlers: handlers_of(log_events, reject_signed_update_handler),
            start_repair_handlers: handlers_of(log_events, start_repair_handler),
            end_repair_handlers: handlers_of(log_events, end_repair_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.compile_block_handlers.is_empty()
            && self.toss_sibling_handlers.is_empty()
            && self.execute_script_handlers.is_empty()
            && self.commit_sector_update_handlers.is_empty()
            && self.drop_sector_update_handlers.is_empty()
            && self.new_signed_update_handlers.is_empty()
            && self.receive_signed_update_handlers.is_empty()
            && self.reject_signed_update_handlers.is_empty()
            && self.start_repair_handlers.is_empty()
            && self.end_repair_handlers.is_empty()
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::CompileBlock(compile_block_event) =>
                self.compile_block_handlers.iter().for_each(|handler| handler(&compile_block_event)),

            Event::TossSibling(toss_sibling_event) =>
                self.toss_sibling_handlers.iter().for_each(|handler| handler(&toss_sibling_event)),

            Event::ExecuteScript(execute_script_event) =>
                self.execute_script_handlers.iter().for_each(|handler| handler(&execute_script_event)),

            Event::CommitSectorUpdate(commit_event) =>
                self.commit_sector_update_handlers.iter().for_each(|handler| handler(&commit_event)),

            Event::DropSectorUpdate(drop_event) =>
                self.drop_sector_update_handlers.iter().for_each(|handler| handler(&drop_event)),

            Event::NewSignedUpdate(new_signed_update_event) =>
                self.new_signed_update_handlers.iter().for_each(|handler| handler(&new_signed_update_event)),

            Event::ReceiveSignedUpdate(receive_event) =>
                self.receive_signed_update_handlers.iter().for_each(|handler| handler(&receive_event)),

            Event::RejectSignedUpdate(reject_event) =>
                self.reject_signed_update_handlers.iter().for_each(|handler| handler(&reject_event)),

            Event::StartRepair(start_repair_event) =>
                self.start_repair_handlers.iter().for_each(|handler| handler(&start_repair_event)),

            Event::EndRepair(end_repair_event) =>
                self.end_repair_handlers.iter().for_each(|handler| handler(&end_repair_event)),
        }
    }
}

fn handlers_of<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone, so only the shutdown signal remains.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(50)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WalletID;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    #[test]
    fn logging_adds_default_handlers() {
        let quiet = EventHandlers::new(false, None, None, None, None, None, None, None, None, None, None);
        assert!(quiet.is_empty());
        let logged = EventHandlers::new(true, None, None, None, None, None, None, None, None, None, None);
        assert_eq!(logged.compile_block_handlers.len(), 1);
        assert_eq!(logged.end_repair_handlers.len(), 1);
    }

    #[test]
    fn handlers_fire_until_shutdown() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let mut handlers = EventHandlers::default();
        assert!(handlers.is_empty());
        handlers
            .start_repair_handlers
            .push(Box::new(move |event: &StartRepairEvent| {
                recorder.lock().unwrap().push(event.wallet_id)
            }));

        let (publisher, subscriber) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let bus = start_event_bus(handlers, subscriber, shutdown_receiver);

        Event::publish(
            &Some(publisher),
            Event::StartRepair(StartRepairEvent {
                timestamp: SystemTime::now(),
                wallet_id: WalletID::new(5),
            }),
        );
        while seen.lock().unwrap().is_empty() {
            std::thread::sleep(Duration::from_millis(10));
        }
        shutdown.send(()).unwrap();
        bus.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![WalletID::new(5)]);
    }
}
