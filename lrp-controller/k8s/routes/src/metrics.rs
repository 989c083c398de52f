use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct RouteMetrics {
    emitted: Counter,
    dropped: Counter,
    handler_errors: Family<HandlerLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct HandlerLabels {
    handler: &'static str,
}

impl RouteMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let emitted = Counter::default();
        reg.register(
            "route_messages_emitted",
            "Total number of route messages queued for the route registry",
            emitted.clone(),
        );

        let dropped = Counter::default();
        reg.register(
            "route_messages_dropped",
            "Total number of route messages dropped because the queue was full",
            dropped.clone(),
        );

        let handler_errors = Family::default();
        reg.register(
            "route_handler_errors",
            "Total number of route handler or collector passes that failed",
            handler_errors.clone(),
        );

        Self {
            emitted,
            dropped,
            handler_errors,
        }
    }

    pub(crate) fn emitted(&self) {
        self.emitted.inc();
    }

    pub(crate) fn dropped(&self) {
        self.dropped.inc();
    }

    pub fn handler_error(&self, handler: &'static str) {
        self.handler_errors
            .get_or_create(&HandlerLabels { handler })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> (u64, u64) {
        (self.emitted.get(), self.dropped.get())
    }

    #[cfg(test)]
    pub(crate) fn handler_errors(&self, handler: &'static str) -> u64 {
        self.handler_errors
            .get_or_create(&HandlerLabels { handler })
            .get()
    }
}
