mod dangerous_triggers;
mod excessive_permissions;
mod template_injection;
mod unpinned_uses;
