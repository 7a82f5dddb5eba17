mod common;

mod import_flow;
mod queue_engine;
mod send_flow;
