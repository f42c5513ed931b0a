//! Per-request context carried through the middleware chain.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use tokio::time::Instant;

use crate::http::Request;

/// Type-erased request extensions map. Middleware leave their findings here
/// (the request [`Classification`](crate::router::Classification), for one)
/// for layers further down the chain.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

pub struct Context {
    request: Request,
    extensions: Extensions,
    received_at: Instant,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
            received_at: Instant::now(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// When the request entered the pipeline.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn into_parts(self) -> (Request, Extensions) {
        (self.request, self.extensions)
    }
}
