//! Handle-based connection registry.
//!
//! [`Endpoint`] replaces the raw-pointer handle of a C-style binding with a
//! generation-checked slot arena: [`ConnectionHandle`] stays cheap to copy,
//! and using one after `release` fails with [`ArqError::InvalidHandle`]
//! instead of touching freed state. Slots are reused, generations are not.

use bytes::Bytes;
use tracing::debug;

use crate::config::{ArqConfig, DelayConfig};
use crate::connection::{Connection, Output};
use crate::error::{ArqError, Result};
use crate::segment::{ConvId, Timestamp};

/// Opaque, copyable handle to a connection owned by an [`Endpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    index: u32,
    generation: u32,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    conn: Option<Connection>,
}

/// Owns a set of independent connections and checks every handle before
/// dereferencing it. Not internally synchronized; callers serialize access
/// the same way they serialize access to a single connection.
#[derive(Default)]
pub struct Endpoint {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Endpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection for `conv` and return its handle
    pub fn create(&mut self, conv: ConvId, config: ArqConfig) -> Result<ConnectionHandle> {
        let conn = Connection::new(conv, config)?;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.conn = Some(conn);

        let handle = ConnectionHandle {
            index,
            generation: slot.generation,
        };
        debug!(conv, ?handle, "connection created");
        Ok(handle)
    }

    /// Release the connection behind `handle`, invalidating the handle and
    /// every copy of it.
    pub fn release(&mut self, handle: ConnectionHandle) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(ArqError::InvalidHandle)?;

        if slot.generation != handle.generation || slot.conn.is_none() {
            return Err(ArqError::InvalidHandle);
        }

        if let Some(mut conn) = slot.conn.take() {
            conn.release();
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }

    /// Borrow the connection behind `handle`
    pub fn get(&self, handle: ConnectionHandle) -> Result<&Connection> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.conn.as_ref())
            .ok_or(ArqError::InvalidHandle)
    }

    /// Mutably borrow the connection behind `handle`
    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Result<&mut Connection> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.conn.as_mut())
            .ok_or(ArqError::InvalidHandle)
    }

    /// Live connections
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.conn.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Convenience passthroughs mirroring the flat operation surface a
    // host binding would expose.

    pub fn set_output(
        &mut self,
        handle: ConnectionHandle,
        output: impl Output + Send + 'static,
    ) -> Result<()> {
        self.get_mut(handle)?.set_output(output);
        Ok(())
    }

    pub fn send(&mut self, handle: ConnectionHandle, data: Bytes) -> Result<()> {
        self.get_mut(handle)?.send(data)
    }

    pub fn recv(&mut self, handle: ConnectionHandle, max_bytes: usize) -> Result<Bytes> {
        self.get_mut(handle)?.recv(max_bytes)
    }

    pub fn input(&mut self, handle: ConnectionHandle, data: Bytes, now: Timestamp) -> Result<()> {
        self.get_mut(handle)?.input(data, now)
    }

    pub fn update(&mut self, handle: ConnectionHandle, now: Timestamp) -> Result<()> {
        self.get_mut(handle)?.update(now)
    }

    pub fn flush(&mut self, handle: ConnectionHandle, now: Timestamp) -> Result<()> {
        self.get_mut(handle)?.flush(now)
    }

    pub fn set_nodelay(&mut self, handle: ConnectionHandle, delay: DelayConfig) -> Result<()> {
        self.get_mut(handle)?.set_nodelay(delay)
    }

    pub fn set_window_size(
        &mut self,
        handle: ConnectionHandle,
        snd_wnd: u32,
        rcv_wnd: u32,
    ) -> Result<()> {
        self.get_mut(handle)?.set_window_size(snd_wnd, rcv_wnd)
    }

    pub fn set_mtu(&mut self, handle: ConnectionHandle, mtu: u32) -> Result<()> {
        self.get_mut(handle)?.set_mtu(mtu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup() {
        let mut ep = Endpoint::new();
        let h = ep.create(7, ArqConfig::default()).unwrap();
        assert_eq!(ep.get(h).unwrap().conv(), 7);
        assert_eq!(ep.len(), 1);
    }

    #[test]
    fn released_handle_is_rejected() {
        let mut ep = Endpoint::new();
        let h = ep.create(7, ArqConfig::default()).unwrap();
        ep.release(h).unwrap();

        assert!(matches!(ep.get(h), Err(ArqError::InvalidHandle)));
        assert!(matches!(ep.release(h), Err(ArqError::InvalidHandle)));
        assert!(ep.is_empty());
    }

    #[test]
    fn slot_reuse_bumps_generation() {
        let mut ep = Endpoint::new();
        let old = ep.create(1, ArqConfig::default()).unwrap();
        ep.release(old).unwrap();

        let new = ep.create(2, ArqConfig::default()).unwrap();
        assert_ne!(old, new);
        assert!(matches!(ep.get(old), Err(ArqError::InvalidHandle)));
        assert_eq!(ep.get(new).unwrap().conv(), 2);
    }

    #[test]
    fn invalid_config_creates_nothing() {
        let mut ep = Endpoint::new();
        let err = ep.create(1, ArqConfig::default().mtu(10)).unwrap_err();
        assert!(matches!(err, ArqError::InvalidConfiguration { .. }));
        assert!(ep.is_empty());
    }
}
