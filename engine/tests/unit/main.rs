mod test_cache;
mod test_fsm;
mod test_routing;
mod test_webhooks;
