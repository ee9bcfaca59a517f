mod handlers;
mod publish_gateway;

pub use publish_gateway::PublishGateway;
