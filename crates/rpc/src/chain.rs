//! Ordered interceptor chains.
//!
//! A chain is an immutable list of [`Interceptor`] units. Running it walks the list with a
//! cursor carried by [`Next`]: unit `i` receives a continuation bound to unit `i + 1`, and the
//! last unit's continuation is the terminal action supplied by the caller (the handler for
//! inbound chains, the transport for outbound ones). A unit short-circuits by returning
//! without calling [`Next::run`].
//!
//! Two chains exist per connection: inbound (request arriving, handler last) and outbound
//! (call or reply leaving, transport last).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::{CorrelationId, MethodId, RpcEnvelope};
use crate::error::RpcError;
use crate::reply::ReplyHandle;

/// Direction an envelope travels through a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
	/// From the transport towards a handler.
	Inbound,
	/// From a caller or handler towards the transport.
	Outbound,
}

impl Direction {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Inbound => "inbound",
			Self::Outbound => "outbound",
		}
	}
}

/// State threaded through one chain pass.
#[derive(Debug)]
pub struct CallContext {
	envelope: RpcEnvelope,
	direction: Direction,
	metadata: HashMap<String, String>,
	entered: usize,
	reached_terminal: bool,
	reply: Option<ReplyHandle>,
}

impl CallContext {
	/// Wraps an envelope for a chain pass.
	#[must_use]
	pub fn new(envelope: RpcEnvelope, direction: Direction) -> Self {
		Self {
			envelope,
			direction,
			metadata: HashMap::new(),
			entered: 0,
			reached_terminal: false,
			reply: None,
		}
	}

	pub(crate) fn with_reply(mut self, reply: ReplyHandle) -> Self {
		self.reply = Some(reply);
		self
	}

	/// Answer channel of an inbound call.
	///
	/// A unit that short-circuits may complete the call itself through it, e.g. from a
	/// cache. `None` on outbound passes.
	#[must_use]
	pub fn reply(&self) -> Option<&ReplyHandle> {
		self.reply.as_ref()
	}

	/// The envelope in flight.
	#[must_use]
	pub fn envelope(&self) -> &RpcEnvelope {
		&self.envelope
	}

	/// Mutable access for transforming units.
	pub fn envelope_mut(&mut self) -> &mut RpcEnvelope {
		&mut self.envelope
	}

	/// Consumes the context, returning the (possibly rewritten) envelope.
	#[must_use]
	pub fn into_envelope(self) -> RpcEnvelope {
		self.envelope
	}

	/// Direction of this pass.
	#[must_use]
	pub const fn direction(&self) -> Direction {
		self.direction
	}

	/// Shorthand for the envelope's method.
	#[must_use]
	pub fn method(&self) -> &MethodId {
		&self.envelope.method
	}

	/// Shorthand for the envelope's correlation id.
	#[must_use]
	pub fn correlation_id(&self) -> CorrelationId {
		self.envelope.correlation_id
	}

	/// Free-form annotations units may leave for later units or the terminal.
	#[must_use]
	pub fn metadata(&self) -> &HashMap<String, String> {
		&self.metadata
	}

	/// Mutable annotations.
	pub fn metadata_mut(&mut self) -> &mut HashMap<String, String> {
		&mut self.metadata
	}

	/// Number of units entered during the last pass.
	#[must_use]
	pub const fn entered(&self) -> usize {
		self.entered
	}

	/// Returns true if the last pass reached the terminal action.
	#[must_use]
	pub const fn reached_terminal(&self) -> bool {
		self.reached_terminal
	}

	/// Index of the unit that stopped the last pass, if one did.
	#[must_use]
	pub fn short_circuited_at(&self) -> Option<usize> {
		if self.reached_terminal {
			None
		} else {
			self.entered.checked_sub(1)
		}
	}
}

/// Terminal action of a chain pass.
pub type Terminal<'a> = dyn FnMut(&mut CallContext) -> Result<(), RpcError> + 'a;

/// A composable unit observing or transforming an RPC in flight.
///
/// Implementations may inspect or mutate the context, forward with `next.run(ctx)`, or
/// short-circuit by returning without forwarding. Returning `Err` fails the call: inbound
/// failures are sent back to the remote caller, outbound failures complete the local caller.
pub trait Interceptor: Send + Sync + 'static {
	/// Name used in logs and chain introspection.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}

	/// Processes one pass.
	///
	/// # Errors
	///
	/// Returns the failure to deliver on the call's completion path.
	fn intercept(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<(), RpcError>;
}

/// Continuation to the remaining units of a chain.
pub struct Next<'a> {
	units: &'a [Arc<dyn Interceptor>],
	cursor: usize,
	terminal: &'a mut Terminal<'a>,
}

impl Next<'_> {
	/// Runs the following unit, or the terminal action after the last one.
	///
	/// # Errors
	///
	/// Propagates the failure produced further down the chain.
	pub fn run(self, ctx: &mut CallContext) -> Result<(), RpcError> {
		let Self {
			units,
			cursor,
			terminal,
		} = self;
		match units.get(cursor) {
			Some(unit) => {
				ctx.entered = cursor + 1;
				let next = Next {
					units,
					cursor: cursor + 1,
					terminal,
				};
				unit.intercept(ctx, next)
			}
			None => {
				ctx.reached_terminal = true;
				terminal(ctx)
			}
		}
	}

	/// Index of the unit this continuation would run next.
	#[must_use]
	pub const fn cursor(&self) -> usize {
		self.cursor
	}

	/// Number of units left before the terminal action.
	#[must_use]
	pub fn remaining(&self) -> usize {
		self.units.len().saturating_sub(self.cursor)
	}
}

/// Immutable, cheaply cloneable sequence of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
	units: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
	/// Builds a chain from units in the order they should run.
	#[must_use]
	pub fn build(units: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
		Self {
			units: units.into_iter().collect(),
		}
	}

	/// A chain with no units; passes go straight to the terminal action.
	#[must_use]
	pub fn empty() -> Self {
		Self::default()
	}

	/// Starts a builder.
	#[must_use]
	pub fn builder() -> ChainBuilder {
		ChainBuilder::default()
	}

	/// Number of units.
	#[must_use]
	pub fn len(&self) -> usize {
		self.units.len()
	}

	/// Returns true if the chain has no units.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.units.is_empty()
	}

	/// Unit names in execution order.
	#[must_use]
	pub fn names(&self) -> Vec<&'static str> {
		self.units.iter().map(|unit| unit.name()).collect()
	}

	/// Runs one pass over `ctx`, ending in `terminal` unless a unit short-circuits.
	///
	/// # Errors
	///
	/// Returns the failure produced by a unit or by the terminal action.
	pub fn run(&self, ctx: &mut CallContext, terminal: &mut Terminal<'_>) -> Result<(), RpcError> {
		ctx.entered = 0;
		ctx.reached_terminal = false;
		Next {
			units: &self.units,
			cursor: 0,
			terminal,
		}
		.run(ctx)
	}
}

impl fmt::Debug for InterceptorChain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.names()).finish()
	}
}

/// Incremental [`InterceptorChain`] construction.
#[derive(Default)]
pub struct ChainBuilder {
	units: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
	/// Appends a unit.
	#[must_use]
	pub fn with(mut self, unit: impl Interceptor) -> Self {
		self.units.push(Arc::new(unit));
		self
	}

	/// Appends a unit shared with other chains.
	#[must_use]
	pub fn with_shared(mut self, unit: Arc<dyn Interceptor>) -> Self {
		self.units.push(unit);
		self
	}

	/// Freezes the chain.
	#[must_use]
	pub fn build(self) -> InterceptorChain {
		InterceptorChain::build(self.units)
	}
}

/// Closure-backed interceptor, see [`from_fn`].
pub struct FnInterceptor<F> {
	name: &'static str,
	f: F,
}

/// Creates an interceptor from a closure.
pub fn from_fn<F>(name: &'static str, f: F) -> FnInterceptor<F>
where
	F: Fn(&mut CallContext, Next<'_>) -> Result<(), RpcError> + Send + Sync + 'static,
{
	FnInterceptor { name, f }
}

impl<F> Interceptor for FnInterceptor<F>
where
	F: Fn(&mut CallContext, Next<'_>) -> Result<(), RpcError> + Send + Sync + 'static,
{
	fn name(&self) -> &'static str {
		self.name
	}

	fn intercept(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<(), RpcError> {
		(self.f)(ctx, next)
	}
}
