use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::opcodes;
use crate::transport::connection::Connection;
use crate::utils::metrics::{global_metrics, Metrics, Timer};
use crate::utils::sync::RwLockExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

type HandlerFn<C> = dyn Fn(&C, &Packet) -> Result<()> + Send + Sync + 'static;

/// One entry of a [`HandlerTable`]: every opcode in `opcodes` routes to `handler`.
pub struct Route<T, C> {
    pub opcodes: &'static [u16],
    pub handler: fn(&T, &C, &Packet) -> Result<()>,
}

/// A handler owner that lists its routes explicitly.
///
/// ```rust
/// use packetwire::error::Result;
/// use packetwire::protocol::dispatcher::{Dispatcher, HandlerTable, Route};
/// use packetwire::protocol::opcodes;
/// use packetwire::Packet;
/// use std::sync::Arc;
///
/// struct Session;
///
/// impl Session {
///     fn login(&self, _ctx: &(), packet: &Packet) -> Result<()> {
///         let _user: String = packet.read()?;
///         Ok(())
///     }
/// }
///
/// impl HandlerTable<()> for Session {
///     fn routes() -> Vec<Route<Self, ()>> {
///         vec![Route { opcodes: &[opcodes::LOGIN], handler: Session::login }]
///     }
/// }
///
/// let dispatcher = Dispatcher::<()>::new();
/// dispatcher.auto_register(Arc::new(Session));
/// assert!(dispatcher.is_registered(opcodes::LOGIN));
/// ```
pub trait HandlerTable<C>: Send + Sync + 'static {
    fn routes() -> Vec<Route<Self, C>>
    where
        Self: Sized;
}

/// Opcode router and the single place packets are disposed.
///
/// `C` is the context handed to handlers, typically the sending connection.
pub struct Dispatcher<C> {
    handlers: RwLock<HashMap<u16, Arc<HandlerFn<C>>>>,
    unknown: RwLock<Arc<HandlerFn<C>>>,
    metrics: Arc<Metrics>,
}

/// Dispatcher whose handlers receive the sending connection.
pub type ConnectionDispatcher = Dispatcher<Arc<Connection>>;

impl<C: 'static> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Dispatcher<C> {
    pub fn new() -> Self {
        Self::with_metrics(global_metrics())
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            unknown: RwLock::new(Arc::new(log_unknown::<C>)),
            metrics,
        }
    }

    /// Route `opcode` to `handler`, replacing any earlier registration.
    pub fn register<F>(&self, opcode: u16, handler: F)
    where
        F: Fn(&C, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        let replaced = self
            .handlers
            .write_scoped()
            .insert(opcode, Arc::new(handler))
            .is_some();
        debug!(
            opcode,
            name = opcodes::name(opcode),
            replaced,
            "Handler registered"
        );
    }

    /// Register every route `owner` lists.
    pub fn auto_register<T: HandlerTable<C>>(&self, owner: Arc<T>) {
        for route in T::routes() {
            let handler = route.handler;
            for &opcode in route.opcodes {
                let owner = Arc::clone(&owner);
                self.register(opcode, move |ctx: &C, packet: &Packet| {
                    handler(&owner, ctx, packet)
                });
            }
        }
    }

    /// Replace the fallback for opcodes without a handler.
    pub fn set_unknown_handler<F>(&self, handler: F)
    where
        F: Fn(&C, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        *self.unknown.write_scoped() = Arc::new(handler);
    }

    pub fn is_registered(&self, opcode: u16) -> bool {
        self.handlers.read_scoped().contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.handlers.read_scoped().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the handler for `packet` (or the fallback), then dispose the packet.
    ///
    /// A handler error is logged and returned; the packet is disposed either way.
    pub fn handle(&self, ctx: &C, packet: Packet) -> Result<()> {
        let _timer = Timer::start("dispatch");
        let opcode = packet.opcode();

        // clone out so handlers run without the table lock
        let handler = self.handlers.read_scoped().get(&opcode).cloned();
        let result = match handler {
            Some(handler) => {
                self.metrics.packet_dispatched();
                handler(ctx, &packet)
            }
            None => {
                self.metrics.packet_unknown();
                let fallback = self.unknown.read_scoped().clone();
                fallback(ctx, &packet)
            }
        };

        if let Err(ref e) = result {
            self.metrics.handler_error();
            warn!(
                opcode,
                name = opcodes::name(opcode),
                id = packet.id(),
                error = %e,
                "Packet handler failed"
            );
        }

        packet.dispose();
        self.metrics.packet_disposed();
        result
    }
}

fn log_unknown<C>(_ctx: &C, packet: &Packet) -> Result<()> {
    warn!(
        opcode = packet.opcode(),
        name = opcodes::name(packet.opcode()),
        "Unhandled packet"
    );
    debug!("{packet}");
    Ok(())
}
