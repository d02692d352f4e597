//! Navigation menus.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use tabled::Tabled;

use waypoint_core::navigation::{NavItem, NavigationMenu};

use super::{Engine, Subject};
use crate::output::{self, OutputFormat};

/// Which part of the menu to show.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum NavView {
    #[default]
    Grouped,
    Flat,
    UserMenu,
    QuickActions,
    /// The whole menu document
    All,
}

#[derive(Debug, Serialize, Tabled)]
struct NavRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Item")]
    label: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl NavRow {
    fn new(group: &str, item: &NavItem, depth: usize) -> Self {
        Self {
            group: group.to_string(),
            label: format!("{}{}", "  ".repeat(depth), item.label),
            path: item.path.clone().unwrap_or_default(),
            id: item.id.clone(),
        }
    }
}

fn push_tree(rows: &mut Vec<NavRow>, group: &str, item: &NavItem, depth: usize) {
    rows.push(NavRow::new(group, item, depth));
    for child in &item.children {
        push_tree(rows, group, child, depth + 1);
    }
}

fn rows(menu: &NavigationMenu, view: NavView) -> Vec<NavRow> {
    let mut rows = Vec::new();
    match view {
        NavView::Grouped | NavView::All => {
            for group in &menu.grouped {
                for item in &group.items {
                    push_tree(&mut rows, &group.label, item, 0);
                }
            }
        }
        NavView::Flat => rows.extend(menu.flat.iter().map(|i| NavRow::new("", i, 0))),
        NavView::UserMenu => rows.extend(menu.user_menu.iter().map(|i| NavRow::new("", i, 0))),
        NavView::QuickActions => rows.extend(menu.quick_actions.iter().map(|i| NavRow::new("", i, 0))),
    }
    rows
}

pub async fn execute(engine: &Engine, subject: &Subject, view: NavView, format: OutputFormat) -> Result<()> {
    let ctx = engine.context(subject).await?;
    let menu = engine.navigation.generate(&ctx).await?;

    match (format, view) {
        (OutputFormat::Table, _) => output::print_list(&rows(&menu, view), format),
        (_, NavView::All) => output::print_item(&menu, format),
        (_, NavView::Grouped) => output::print_item(&menu.grouped, format),
        (_, NavView::Flat) => output::print_item(&menu.flat, format),
        (_, NavView::UserMenu) => output::print_item(&menu.user_menu, format),
        (_, NavView::QuickActions) => output::print_item(&menu.quick_actions, format),
    }
}
