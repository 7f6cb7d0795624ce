//! Method id to handler routing for one connection.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::chain::InterceptorChain;
use crate::envelope::MethodId;
use crate::error::{Error, Result};
use crate::service::{Handler, Service};

/// A handler, the inbound chain in front of it, and the service that owns it.
#[derive(Clone)]
pub struct HandlerRegistration {
	pub(crate) handler: Handler,
	pub(crate) chain: InterceptorChain,
	pub(crate) service: Option<Arc<dyn Service>>,
}

impl HandlerRegistration {
	/// Inbound chain applied before the handler.
	#[must_use]
	pub fn chain(&self) -> &InterceptorChain {
		&self.chain
	}

	/// Owning service, if installed through one.
	#[must_use]
	pub fn service(&self) -> Option<&Arc<dyn Service>> {
		self.service.as_ref()
	}
}

/// Handlers installed on a connection. Built when the connection is established and
/// released at teardown.
#[derive(Default)]
pub struct DispatchTable {
	handlers: HashMap<MethodId, HandlerRegistration>,
}

impl DispatchTable {
	/// Creates an empty table.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs a standalone handler behind `chain`.
	///
	/// # Errors
	///
	/// [`Error::DuplicateMethod`] if `method` is already installed.
	pub fn install(&mut self, method: MethodId, handler: Handler, chain: InterceptorChain) -> Result<()> {
		self.insert(method, HandlerRegistration {
			handler,
			chain,
			service: None,
		})
	}

	/// Installs a standalone handler whose `on_close` runs once at teardown, like a
	/// service's close hook.
	///
	/// # Errors
	///
	/// [`Error::DuplicateMethod`] if `method` is already installed.
	pub fn install_with_close(
		&mut self,
		method: MethodId,
		handler: Handler,
		chain: InterceptorChain,
		on_close: impl Fn() + Send + Sync + 'static,
	) -> Result<()> {
		let single = SingleHandler {
			method,
			handler,
			on_close: Box::new(on_close),
		};
		self.install_service(Arc::new(single), chain)
	}

	/// Installs every method of `service` behind `chain`, all or nothing.
	///
	/// # Errors
	///
	/// [`Error::DuplicateMethod`] if any method is already installed or listed twice; the
	/// table is left unchanged.
	pub fn install_service(&mut self, service: Arc<dyn Service>, chain: InterceptorChain) -> Result<()> {
		let methods = Arc::clone(&service).methods();
		for (i, (method, _)) in methods.iter().enumerate() {
			let repeated = methods[..i].iter().any(|(seen, _)| seen == method);
			if repeated || self.handlers.contains_key(method) {
				return Err(Error::DuplicateMethod(method.clone()));
			}
		}
		tracing::debug!(target: "rpc", service = service.name(), methods = methods.len(), "rpc.service.installed");
		for (method, handler) in methods {
			self.insert(method, HandlerRegistration {
				handler,
				chain: chain.clone(),
				service: Some(Arc::clone(&service)),
			})?;
		}
		Ok(())
	}

	fn insert(&mut self, method: MethodId, registration: HandlerRegistration) -> Result<()> {
		match self.handlers.entry(method) {
			Entry::Occupied(entry) => Err(Error::DuplicateMethod(entry.key().clone())),
			Entry::Vacant(entry) => {
				entry.insert(registration);
				Ok(())
			}
		}
	}

	/// Removes the handler of `method`. Returns false if none was installed.
	pub fn uninstall(&mut self, method: &MethodId) -> bool {
		self.handlers.remove(method).is_some()
	}

	/// Looks up the registration for `method`.
	#[must_use]
	pub fn lookup(&self, method: &MethodId) -> Option<&HandlerRegistration> {
		self.handlers.get(method)
	}

	/// Returns true if `method` has a handler.
	#[must_use]
	pub fn contains(&self, method: &MethodId) -> bool {
		self.handlers.contains_key(method)
	}

	/// Number of installed handlers.
	#[must_use]
	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	/// Returns true if no handler is installed.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	/// Installed methods, sorted.
	#[must_use]
	pub fn methods(&self) -> Vec<MethodId> {
		let mut methods: Vec<_> = self.handlers.keys().cloned().collect();
		methods.sort();
		methods
	}

	/// Releases the table, returning each distinct owning service once.
	pub(crate) fn into_services(self) -> Vec<Arc<dyn Service>> {
		let mut services: Vec<Arc<dyn Service>> = Vec::new();
		for service in self.handlers.into_values().filter_map(|reg| reg.service) {
			if !services.iter().any(|seen| Arc::ptr_eq(seen, &service)) {
				services.push(service);
			}
		}
		services
	}
}

/// One handler with a close hook, registered as a single-method service.
struct SingleHandler {
	method: MethodId,
	handler: Handler,
	on_close: Box<dyn Fn() + Send + Sync>,
}

impl Service for SingleHandler {
	fn name(&self) -> &str {
		self.method.as_str()
	}

	fn methods(self: Arc<Self>) -> Vec<(MethodId, Handler)> {
		vec![(self.method.clone(), Arc::clone(&self.handler))]
	}

	fn on_close(&self) {
		(self.on_close)();
	}
}
