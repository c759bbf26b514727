//! Single-owner arbitration of audio playback.
//!
//! The arbiter records which audio source is current. Starting another one
//! pauses the previous; stopping everything also sweeps sources the page
//! started on its own, so no two sources are ever audible together.
//!
//! The arbiter is an ordinary value owned by the root of the UI and lent to
//! every player. Audio state can change underneath it (a source ends, the
//! user pauses through native controls), so every operation tolerates stale
//! handles and never fails.

use std::fmt::Debug;
use tracing::debug;

/// A playable audio source.
pub trait AudioHandle {
    type Id: PartialEq + Debug;

    fn id(&self) -> Self::Id;

    /// Whether the source is audible right now.
    fn is_playing(&self) -> bool;

    /// Pause the source. Pausing a paused source does nothing.
    fn pause(&self);
}

/// Enumerates every playable source currently present, including those
/// that were never started through the arbiter.
pub trait AudioEnvironment {
    type Handle: AudioHandle;

    fn discover(&self) -> Vec<Self::Handle>;
}

type IdOf<E> = <<E as AudioEnvironment>::Handle as AudioHandle>::Id;

pub struct PlaybackArbiter<E: AudioEnvironment> {
    environment: E,
    current: Option<E::Handle>,
}

impl<E: AudioEnvironment> PlaybackArbiter<E> {
    pub fn new(environment: E) -> Self {
        Self {
            environment,
            current: None,
        }
    }

    /// Id of the source currently recorded as playing.
    pub fn current(&self) -> Option<IdOf<E>> {
        self.current.as_ref().map(AudioHandle::id)
    }

    /// Record `handle` as current, pausing a different current source first.
    /// Calling again with the current source does nothing.
    pub fn play(&mut self, handle: E::Handle) {
        let id = handle.id();
        if let Some(previous) = self.current.take() {
            if previous.id() == id {
                self.current = Some(previous);
                return;
            }
            debug!(target: "chatdesk.client.playback", previous = ?previous.id(), "Pausing previous source");
            previous.pause();
        }

        debug!(target: "chatdesk.client.playback", current = ?id, "Source playing");
        self.current = Some(handle);
    }

    /// Forget `id` if it is the current source. Stale ids are ignored.
    pub fn pause(&mut self, id: &IdOf<E>) {
        if self.current.as_ref().is_some_and(|h| h.id() == *id) {
            self.current = None;
            debug!(target: "chatdesk.client.playback", source = ?id, "Source paused");
        }
    }

    /// Pause every audible source except `except`, registered or not.
    pub fn stop_all(&mut self, except: Option<&IdOf<E>>) {
        let is_exempt = |handle: &E::Handle| except.is_some_and(|keep| handle.id() == *keep);

        if let Some(current) = self.current.take() {
            if is_exempt(&current) {
                self.current = Some(current);
            } else {
                current.pause();
            }
        }

        let mut swept = 0usize;
        for handle in self.environment.discover() {
            if handle.is_playing() && !is_exempt(&handle) {
                handle.pause();
                swept += 1;
            }
        }

        debug!(
            target: "chatdesk.client.playback",
            kept = ?self.current(),
            swept,
            "Stopped all sources"
        );
    }
}

/// In-memory audio sources for tests and headless clients.
pub mod mock {
    use super::{AudioEnvironment, AudioHandle};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// A source whose playing flag is shared by all clones.
    #[derive(Debug, Clone)]
    pub struct FakeAudio {
        id: u32,
        playing: Rc<Cell<bool>>,
        pauses: Rc<Cell<usize>>,
    }

    impl FakeAudio {
        pub fn new(id: u32) -> Self {
            Self {
                id,
                playing: Rc::new(Cell::new(false)),
                pauses: Rc::new(Cell::new(0)),
            }
        }

        /// Start the source without telling any arbiter.
        pub fn start(&self) {
            self.playing.set(true);
        }

        /// Times `pause` was called.
        pub fn pause_count(&self) -> usize {
            self.pauses.get()
        }
    }

    impl AudioHandle for FakeAudio {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }

        fn is_playing(&self) -> bool {
            self.playing.get()
        }

        fn pause(&self) {
            self.playing.set(false);
            self.pauses.set(self.pauses.get() + 1);
        }
    }

    /// Every source added so far, discoverable by the sweep.
    #[derive(Debug, Clone, Default)]
    pub struct FakePage {
        sources: Rc<RefCell<Vec<FakeAudio>>>,
    }

    impl FakePage {
        pub fn add(&self, id: u32) -> FakeAudio {
            let audio = FakeAudio::new(id);
            self.sources.borrow_mut().push(audio.clone());
            audio
        }

        pub fn playing(&self) -> Vec<u32> {
            self.sources
                .borrow()
                .iter()
                .filter(|a| a.is_playing())
                .map(FakeAudio::id)
                .collect()
        }
    }

    impl AudioEnvironment for FakePage {
        type Handle = FakeAudio;

        fn discover(&self) -> Vec<FakeAudio> {
            self.sources.borrow().clone()
        }
    }
}
