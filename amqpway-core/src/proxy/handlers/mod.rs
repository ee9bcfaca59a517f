mod publish;

#[cfg(test)]
mod tests;

pub use publish::PublishHandler;
