use std::{collections::HashMap, sync::Arc};

use log::debug;
use parking_lot::Mutex;

use crate::{Builder, Engine, Error, Params, Result, Trigger};

/// Identifies a stream opened by the PCM framework
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct StreamId(pub u32);

/// Handle to an engine in a [`Registry`]
///
/// Stays invalid once the engine is closed, even if its slot is later reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EngineId {
    index: u32,
    generation: u32,
}

/// One engine per open stream
///
/// Engines are built from a common [`Builder`] template and share no state with each other.
pub struct Registry {
    template: Builder,
    table: Mutex<Table>,
}

impl Registry {
    /// Construct an empty registry building engines from `template`
    pub fn new(template: Builder) -> Self {
        Self {
            template,
            table: Mutex::new(Table::default()),
        }
    }

    /// Create an idle engine for `stream`
    ///
    /// On failure nothing is registered.
    pub fn open(&self, stream: StreamId) -> Result<EngineId> {
        if self.table.lock().streams.contains_key(&stream) {
            return Err(Error::StreamBusy(stream));
        }
        // Spawns a thread, so done outside the table lock
        let engine = Arc::new(self.template.build()?);

        let id = {
            let mut table = self.table.lock();
            if table.streams.contains_key(&stream) {
                // Raced with another open; `engine` is freed on drop
                return Err(Error::StreamBusy(stream));
            }
            table.reserve()?;
            table.insert(stream, engine)
        };
        debug!("opened {:?} as {:?}", stream, id);
        Ok(id)
    }

    /// Free the engine named by `id` and forget its stream
    ///
    /// Waits for any period callback in progress. Must not be called from one of the engine's own
    /// callbacks.
    pub fn close(&self, id: EngineId) -> Result<()> {
        let (stream, engine) = self.table.lock().remove(id)?;
        engine.free();
        debug!("closed {:?}", stream);
        Ok(())
    }

    /// Engine named by `id`
    pub fn get(&self, id: EngineId) -> Result<Arc<Engine>> {
        let table = self.table.lock();
        table
            .slot(id)
            .map(|slot| slot.engine.clone())
            .ok_or(Error::UnknownEngine(id))
    }

    /// Handle of the engine open for `stream`, if any
    pub fn lookup(&self, stream: StreamId) -> Option<EngineId> {
        self.table.lock().streams.get(&stream).copied()
    }

    /// Number of open engines
    pub fn len(&self) -> usize {
        self.table.lock().streams.len()
    }

    /// Whether no engines are open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// [`Engine::prepare`] the engine named by `id`
    pub fn prepare(&self, id: EngineId, params: Params) -> Result<()> {
        self.get(id)?.prepare(params)
    }

    /// [`Engine::start`] the engine named by `id`
    pub fn start(&self, id: EngineId) -> Result<()> {
        self.get(id)?.start()
    }

    /// [`Engine::stop`] the engine named by `id`
    pub fn stop(&self, id: EngineId) -> Result<()> {
        self.get(id)?.stop()
    }

    /// [`Engine::trigger`] the engine named by `id`
    pub fn trigger(&self, id: EngineId, cmd: Trigger) -> Result<()> {
        self.get(id)?.trigger(cmd)
    }

    /// [`Engine::pointer`] of the engine named by `id`
    pub fn pointer(&self, id: EngineId) -> Result<usize> {
        Ok(self.get(id)?.pointer())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let table = std::mem::take(&mut *self.table.lock());
        for slot in table.slots {
            if let Some(occupant) = slot.occupant {
                occupant.engine.free();
            }
        }
    }
}

#[derive(Default)]
struct Table {
    slots: Vec<Slot>,
    /// Indices of vacant slots
    free: Vec<usize>,
    streams: HashMap<StreamId, EngineId>,
}

struct Slot {
    generation: u32,
    occupant: Option<Occupant>,
}

struct Occupant {
    stream: StreamId,
    engine: Arc<Engine>,
}

impl Table {
    /// Ensure `insert` and a later `remove` can't allocate
    fn reserve(&mut self) -> Result<()> {
        self.streams
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory)?;
        if self.free.is_empty() {
            self.slots.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        }
        let needed = (self.slots.len() + 1).saturating_sub(self.free.len());
        self.free
            .try_reserve(needed)
            .map_err(|_| Error::OutOfMemory)?;
        Ok(())
    }

    fn insert(&mut self, stream: StreamId, engine: Arc<Engine>) -> EngineId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    occupant: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.occupant = Some(Occupant { stream, engine });
        let id = EngineId {
            index: index as u32,
            generation: slot.generation,
        };
        self.streams.insert(stream, id);
        id
    }

    fn slot(&self, id: EngineId) -> Option<&Occupant> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.occupant.as_ref()
    }

    fn remove(&mut self, id: EngineId) -> Result<(StreamId, Arc<Engine>)> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .ok_or(Error::UnknownEngine(id))?;
        let occupant = slot.occupant.take().ok_or(Error::UnknownEngine(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index as usize);
        self.streams.remove(&occupant.stream);
        Ok((occupant.stream, occupant.engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine, tone, ManualClock, State};

    fn registry() -> (Arc<ManualClock>, Registry) {
        let clock = Arc::new(ManualClock::new(1000));
        let mut template = engine();
        template.clock(clock.clone()).source(tone::ramp(8000));
        (clock, Registry::new(template))
    }

    const PARAMS: Params = Params {
        rate: 8000,
        buffer_size: 8000,
        period_size: 2000,
    };

    #[test]
    fn open_close() {
        let (_, reg) = registry();
        assert!(reg.is_empty());
        let id = reg.open(StreamId(3)).unwrap();
        assert_eq!(reg.lookup(StreamId(3)), Some(id));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(id).unwrap().state(), State::Idle);
        reg.close(id).unwrap();
        assert!(reg.is_empty());
        assert_eq!(reg.lookup(StreamId(3)), None);
        assert!(matches!(reg.get(id), Err(Error::UnknownEngine(x)) if x == id));
        assert!(matches!(reg.close(id), Err(Error::UnknownEngine(_))));
    }

    #[test]
    fn stream_busy() {
        let (_, reg) = registry();
        reg.open(StreamId(1)).unwrap();
        assert!(matches!(
            reg.open(StreamId(1)),
            Err(Error::StreamBusy(StreamId(1)))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn stale_handle_after_reuse() {
        let (_, reg) = registry();
        let a = reg.open(StreamId(1)).unwrap();
        reg.close(a).unwrap();
        let b = reg.open(StreamId(2)).unwrap();
        assert_eq!(a.index, b.index);
        assert_ne!(a, b);
        assert!(reg.get(a).is_err());
        assert!(reg.get(b).is_ok());
    }

    #[test]
    fn failed_open_registers_nothing() {
        let mut template = engine();
        template.channels(7);
        let reg = Registry::new(template);
        assert!(matches!(
            reg.open(StreamId(1)),
            Err(Error::ChannelsUnsupported(7))
        ));
        assert!(reg.is_empty());
        assert_eq!(reg.lookup(StreamId(1)), None);
    }

    #[test]
    fn engines_are_independent() {
        let (clock, reg) = registry();
        let a = reg.open(StreamId(1)).unwrap();
        let b = reg.open(StreamId(2)).unwrap();
        reg.prepare(a, PARAMS).unwrap();
        reg.prepare(b, PARAMS).unwrap();
        reg.start(a).unwrap();
        clock.advance(100);
        assert_eq!(reg.pointer(a).unwrap(), 800);
        assert_eq!(reg.pointer(b).unwrap(), 0);
        assert!(matches!(
            reg.stop(b),
            Err(Error::InvalidState {
                state: State::Prepared,
                ..
            })
        ));
        reg.trigger(a, Trigger::Stop).unwrap();
        reg.close(b).unwrap();
        assert_eq!(reg.pointer(a).unwrap(), 800);
    }

    #[test]
    fn close_frees_shared_engine() {
        let (_, reg) = registry();
        let id = reg.open(StreamId(1)).unwrap();
        let engine = reg.get(id).unwrap();
        reg.prepare(id, PARAMS).unwrap();
        reg.start(id).unwrap();
        reg.close(id).unwrap();
        assert_eq!(engine.state(), State::Freed);
        assert!(!engine.is_running());
    }
}
