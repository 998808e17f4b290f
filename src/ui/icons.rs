//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[STOP]");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Phase indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static SCAN: Emoji<'_, '_> = Emoji("🔍 ", "[S]");
pub static BUILD: Emoji<'_, '_> = Emoji("🏗️  ", "[B]");
pub static DOCS: Emoji<'_, '_> = Emoji("📝 ", "[G]");
