pub trait AbstractNode {
    fn name(&self) -> Option<String> {
        None
    }

    /// Whether the node may currently be used as a connection endpoint.
    fn is_connectable(&self) -> bool;
}
