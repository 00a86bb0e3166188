//! Request handler traits and utilities
//!
//! The server calls [`Handler::call`] once per dispatched request. The
//! handler writes the response through the [`Exchange`] and either releases it
//! before returning or keeps the [`ConnectionId`](crate::protocol::ConnectionId)
//! and finishes later through [`Server::responder`](crate::Server::responder).

use crate::connection::Exchange;

pub trait Handler {
    fn call(&mut self, exchange: &mut Exchange<'_>);

    /// More of a request body can be read with [`Exchange::read_body`].
    ///
    /// Only happens for a dispatched request whose body did not fit the read
    /// buffer, until the whole body was read or the response released. Read
    /// until `WouldBlock`: bytes already signalled are not signalled again.
    fn body_readable(&mut self, exchange: &mut Exchange<'_>) {
        let _ = exchange;
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn call(&mut self, exchange: &mut Exchange<'_>) {
        (**self).call(exchange);
    }

    fn body_readable(&mut self, exchange: &mut Exchange<'_>) {
        (**self).body_readable(exchange);
    }
}

impl<H: Handler + ?Sized> Handler for &mut H {
    fn call(&mut self, exchange: &mut Exchange<'_>) {
        (**self).call(exchange);
    }

    fn body_readable(&mut self, exchange: &mut Exchange<'_>) {
        (**self).body_readable(exchange);
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: FnMut(&mut Exchange<'_>),
{
    fn call(&mut self, exchange: &mut Exchange<'_>) {
        (self.f)(exchange);
    }
}

pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: FnMut(&mut Exchange<'_>),
{
    HandlerFn { f }
}
