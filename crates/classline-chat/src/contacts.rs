use tracing::debug;

use classline_store::Store;
use classline_types::error::ChatError;
use classline_types::models::{Actor, ChatContact, Role};

/// Resolve the directory population the actor may message, with the
/// derived conversation summary for each entry.
///
/// Teachers see every student tenant-wide and every other role sees
/// every teacher; there is no explicit contact table. An actor whose own
/// directory row is missing is treated like a student and sees teachers.
pub fn resolve_contacts(
    store: &Store,
    actor: Option<&Actor>,
) -> Result<Vec<ChatContact>, ChatError> {
    let actor = actor.ok_or(ChatError::NotAuthenticated)?;

    let target = match store.get_role(actor.id)? {
        Some(role) => role.opposing(),
        // Missing role record: fall back to the student-side query.
        None => Role::Teacher,
    };

    let entries = store.list_by_role(target)?;
    debug!(actor = %actor.id, opposing = target.as_str(), count = entries.len(), "resolved contacts");

    let mut contacts = Vec::with_capacity(entries.len());
    for entry in entries {
        let last_message = store.last_message(actor.id, entry.id)?;
        let unread_count = store.unread_count(entry.id, actor.id)?;
        contacts.push(ChatContact {
            id: entry.id,
            name: entry.name,
            role: entry.role,
            last_message,
            unread_count,
        });
    }
    Ok(contacts)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;

    fn seeded_store() -> (Arc<Store>, Uuid, Uuid, Uuid) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let teacher = Uuid::new_v4();
        let student = Uuid::new_v4();
        let parent = Uuid::new_v4();
        store.create_user(teacher, "Mara", Role::Teacher).unwrap();
        store.create_user(student, "Ben", Role::Student).unwrap();
        store.create_user(parent, "Iris", Role::Parent).unwrap();
        (store, teacher, student, parent)
    }

    #[test]
    fn teacher_sees_only_students() {
        let (store, teacher, student, _) = seeded_store();
        let actor = Actor { id: teacher, role: Role::Teacher };

        let contacts = resolve_contacts(&store, Some(&actor)).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, student);
        assert_eq!(contacts[0].role, Role::Student);
    }

    #[test]
    fn student_sees_only_teachers() {
        let (store, teacher, student, _) = seeded_store();
        let actor = Actor { id: student, role: Role::Student };

        let contacts = resolve_contacts(&store, Some(&actor)).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, teacher);
    }

    #[test]
    fn non_teacher_roles_see_teachers() {
        let (store, teacher, _, parent) = seeded_store();
        let actor = Actor { id: parent, role: Role::Parent };

        let contacts = resolve_contacts(&store, Some(&actor)).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, teacher);
    }

    #[test]
    fn missing_role_record_falls_back_to_teachers() {
        let (store, teacher, _, _) = seeded_store();
        // Actor not present in the directory at all.
        let actor = Actor { id: Uuid::new_v4(), role: Role::Student };

        let contacts = resolve_contacts(&store, Some(&actor)).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, teacher);
    }

    #[test]
    fn no_actor_is_not_authenticated() {
        let (store, _, _, _) = seeded_store();
        assert!(matches!(
            resolve_contacts(&store, None),
            Err(ChatError::NotAuthenticated)
        ));
    }

    #[test]
    fn summary_fields_are_recomputed_per_listing() {
        let (store, teacher, student, _) = seeded_store();
        let actor = Actor { id: teacher, role: Role::Teacher };

        let latest = store.insert_message(student, teacher, "question").unwrap();
        let contacts = resolve_contacts(&store, Some(&actor)).unwrap();
        assert_eq!(contacts[0].unread_count, 1);
        assert_eq!(contacts[0].last_message.as_ref().unwrap().id, latest.id);

        store.mark_conversation_read(student, teacher).unwrap();
        let contacts = resolve_contacts(&store, Some(&actor)).unwrap();
        assert_eq!(contacts[0].unread_count, 0);
        assert_eq!(contacts[0].last_message.as_ref().unwrap().id, latest.id);
    }
}
