pub mod assoc;
pub mod explore;
pub mod mask;
pub mod memory;
pub mod policy;
pub mod registry;

use std::sync::Arc;

pub use policy::{ExecutionPolicy, PolicyOverride};
pub use registry::{ToolContext, ToolHandler, ToolRegistry, ToolSpec};

/// The full tool surface, wired against one context.
pub fn build_registry(ctx: ToolContext) -> ToolRegistry {
    let mut registry = ToolRegistry::new(ctx);
    registry.register(Arc::new(memory::SearchMemoryTool));
    registry.register(Arc::new(memory::CreateNoteTool));
    registry.register(Arc::new(memory::UpdateNoteTool));
    registry.register(Arc::new(memory::DeleteNoteTool));
    registry.register(Arc::new(explore::ExploreLinksTool));
    registry.register(Arc::new(explore::MaintainVaultTool));
    registry.register(Arc::new(assoc::AssociativeSearchTool));
    registry.register(Arc::new(assoc::SessionContextTool));
    registry.register(Arc::new(assoc::ReflectSessionTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::tests::test_context;

    #[test]
    fn registry_advertises_the_full_surface() {
        let (_dir, ctx) = test_context();
        let registry = build_registry(ctx);
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        for expected in [
            "search_memory",
            "create_note",
            "update_note",
            "delete_note",
            "explore_links",
            "associative_search",
            "session_context",
            "reflect_session",
            "maintain_vault",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }
}
