use async_graphql::SimpleObject;
use serde::Serialize;

use super::event::Event;
use super::permissions::{has_permission, Panel, Permission};
use super::resource::Resource;
use super::user::User;
use crate::store::Store;

/// An overview of the admin dashboard for one viewer.
///
/// Totals are only filled in for collections the viewer may manage.
#[derive(SimpleObject, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    /// The management panels the viewer can open
    pub panels: Vec<Panel>,
    pub event_count: Option<u64>,
    pub resource_count: Option<u64>,
    pub user_count: Option<u64>,
}

impl Dashboard {
    pub async fn for_viewer(viewer: &User, store: &Store) -> Self {
        let count = |items: usize| Some(items as u64);

        Self {
            panels: Panel::visible_to(viewer),
            event_count: if has_permission(viewer, Permission::ManageEvents) {
                count(Event::all(store).await.len())
            } else {
                None
            },
            resource_count: if has_permission(viewer, Permission::ManageResources) {
                count(Resource::all(store).await.len())
            } else {
                None
            },
            user_count: if has_permission(viewer, Permission::ManageUsers) {
                count(User::all(store).await.len())
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::{memory_store, mock_user, spring_conference};

    #[tokio::test]
    async fn totals_follow_permissions() {
        let store = memory_store();
        Event::create(spring_conference(), None, &store).await.unwrap();

        let organizer = mock_user("member", &[Permission::ManageEvents]);
        let dashboard = Dashboard::for_viewer(&organizer, &store).await;
        assert_eq!(dashboard.panels, vec![Panel::Events]);
        assert_eq!(dashboard.event_count, Some(1));
        assert_eq!(dashboard.user_count, None);

        let president = mock_user("president", &[]);
        let dashboard = Dashboard::for_viewer(&president, &store).await;
        assert_eq!(dashboard.panels, Panel::ALL.to_vec());
        assert_eq!(dashboard.resource_count, Some(0));
    }
}
