mod collector_flow;
mod match_lifecycle;
