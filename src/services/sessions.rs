use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use rand::{seq::SliceRandom, RngCore};
use uuid::Uuid;

use crate::enums::SessionStatus;
use crate::models::{NewParticipant, NewSession, Participant, Session};
use crate::notify::{EventPublisher, Update};
use crate::schema::{participants, sessions};
use crate::views::participant_view;

use super::{now, ServiceError, ServiceResult};

pub const PARTICIPANT_COLORS: [&str; 10] = [
    "#3B82F6", "#EF4444", "#10B981", "#F59E0B", "#8B5CF6", "#EC4899", "#06B6D4", "#84CC16",
    "#F97316", "#6366F1",
];

pub const ONLINE_WINDOW_SECONDS: i64 = 30;

pub const DEFAULT_AGENT_NAME: &str = "Claude Assistant";

pub const SESSION_LIST_LIMIT: i64 = 50;

pub fn generate_invite_code() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn random_color() -> &'static str {
    PARTICIPANT_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(PARTICIPANT_COLORS[0])
}

pub fn online_threshold(reference: NaiveDateTime) -> NaiveDateTime {
    reference - Duration::seconds(ONLINE_WINDOW_SECONDS)
}

pub fn is_online(last_seen_at: Option<NaiveDateTime>, reference: NaiveDateTime) -> bool {
    last_seen_at.is_some_and(|seen| seen >= online_threshold(reference))
}

pub fn find_session(conn: &mut PgConnection, session_id: Uuid) -> ServiceResult<Session> {
    sessions::table
        .find(session_id)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Session non trouvée"))
}

pub fn find_by_invite_code(conn: &mut PgConnection, code: &str) -> ServiceResult<Option<Session>> {
    Ok(sessions::table
        .filter(sessions::invite_code.eq(code))
        .first(conn)
        .optional()?)
}

pub fn find_participant(conn: &mut PgConnection, participant_id: Uuid) -> ServiceResult<Participant> {
    participants::table
        .find(participant_id)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Participant non trouvé"))
}

/// Newest sessions first.
pub fn list_sessions(conn: &mut PgConnection) -> ServiceResult<Vec<Session>> {
    Ok(sessions::table
        .order(sessions::created_at.desc())
        .limit(SESSION_LIST_LIMIT)
        .load(conn)?)
}

pub fn create_session(
    conn: &mut PgConnection,
    title: &str,
    description: Option<String>,
) -> ServiceResult<Session> {
    let timestamp = now();
    let new_session = NewSession {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description,
        status: SessionStatus::default().as_str().to_string(),
        invite_code: generate_invite_code(),
        created_at: timestamp,
        updated_at: timestamp,
    };

    diesel::insert_into(sessions::table)
        .values(&new_session)
        .execute(conn)?;

    tracing::info!(session_id = %new_session.id, "session created");
    find_session(conn, new_session.id)
}

/// Returns the existing participant with this pseudo, or registers a new one.
pub fn join_session(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session: &Session,
    pseudo: &str,
    is_agent: bool,
) -> ServiceResult<Participant> {
    let timestamp = now();

    if let Some(existing) = find_by_pseudo(conn, session.id, pseudo)? {
        diesel::update(participants::table.find(existing.id))
            .set(participants::last_seen_at.eq(Some(timestamp)))
            .execute(conn)?;
        return find_participant(conn, existing.id);
    }

    let new_participant = NewParticipant {
        id: Uuid::new_v4(),
        session_id: session.id,
        pseudo: pseudo.to_string(),
        color: random_color().to_string(),
        is_agent,
        last_seen_at: Some(timestamp),
        created_at: timestamp,
    };

    match diesel::insert_into(participants::table)
        .values(&new_participant)
        .execute(conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            // Lost a race against a concurrent join with the same pseudo.
            return find_by_pseudo(conn, session.id, pseudo)?
                .ok_or(ServiceError::NotFound("Participant non trouvé"));
        }
        Err(err) => return Err(err.into()),
    }

    tracing::info!(
        session_id = %session.id,
        participant_id = %new_participant.id,
        is_agent,
        "participant joined"
    );

    broadcast_presence(conn, publisher, session.id)?;
    find_participant(conn, new_participant.id)
}

fn find_by_pseudo(
    conn: &mut PgConnection,
    session_id: Uuid,
    pseudo: &str,
) -> ServiceResult<Option<Participant>> {
    Ok(participants::table
        .filter(participants::session_id.eq(session_id))
        .filter(participants::pseudo.eq(pseudo))
        .first(conn)
        .optional()?)
}

pub fn update_session_status(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session: &Session,
    status: SessionStatus,
) -> ServiceResult<Session> {
    diesel::update(sessions::table.find(session.id))
        .set((
            sessions::status.eq(status.as_str()),
            sessions::updated_at.eq(now()),
        ))
        .execute(conn)?;

    publisher.publish(Update::session_status_changed(session.id, status.as_str()));
    find_session(conn, session.id)
}

pub fn archive_session(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session: &Session,
) -> ServiceResult<Session> {
    update_session_status(conn, publisher, session, SessionStatus::Archived)
}

pub fn regenerate_invite_code(conn: &mut PgConnection, session: &Session) -> ServiceResult<Session> {
    diesel::update(sessions::table.find(session.id))
        .set((
            sessions::invite_code.eq(generate_invite_code()),
            sessions::updated_at.eq(now()),
        ))
        .execute(conn)?;
    find_session(conn, session.id)
}

/// Records activity for a participant and re-broadcasts the online list.
pub fn touch_presence(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    participant: &Participant,
    current_document_id: Option<Uuid>,
) -> ServiceResult<Participant> {
    let timestamp = now();
    match current_document_id {
        Some(document_id) => {
            diesel::update(participants::table.find(participant.id))
                .set((
                    participants::last_seen_at.eq(Some(timestamp)),
                    participants::current_document_id.eq(Some(document_id)),
                ))
                .execute(conn)?;
        }
        None => {
            diesel::update(participants::table.find(participant.id))
                .set(participants::last_seen_at.eq(Some(timestamp)))
                .execute(conn)?;
        }
    }

    broadcast_presence(conn, publisher, participant.session_id)?;
    find_participant(conn, participant.id)
}

/// Participants seen within the online window, ordered by pseudo.
pub fn online_participants(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> ServiceResult<Vec<Participant>> {
    Ok(participants::table
        .filter(participants::session_id.eq(session_id))
        .filter(participants::last_seen_at.ge(online_threshold(now())))
        .order(participants::pseudo.asc())
        .load(conn)?)
}

pub fn broadcast_presence(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session_id: Uuid,
) -> ServiceResult<()> {
    let online: Vec<_> = online_participants(conn, session_id)?
        .iter()
        .map(participant_view)
        .collect();
    let payload = serde_json::to_value(online).unwrap_or_default();
    publisher.publish(Update::presence_update(session_id, payload));
    Ok(())
}

pub struct AgentSession {
    pub session: Session,
    pub agent: Participant,
}

/// Creates a session and joins it as an agent in one step.
pub fn create_agent_session(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    title: &str,
    description: Option<String>,
    agent_name: Option<&str>,
) -> ServiceResult<AgentSession> {
    let agent_name = agent_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_AGENT_NAME);

    let session = create_session(conn, title, description)?;
    let agent = join_session(conn, publisher, &session, agent_name, true)?;
    Ok(AgentSession { session, agent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn invite_codes_are_32_hex_chars() {
        let code = generate_invite_code();
        assert_eq!(code.len(), 32);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(code, generate_invite_code());
    }

    #[test]
    fn colors_come_from_palette() {
        for _ in 0..20 {
            assert!(PARTICIPANT_COLORS.contains(&random_color()));
        }
    }

    #[test]
    fn online_window_is_inclusive_at_thirty_seconds() {
        let reference = at(10, 0, 30);
        assert!(is_online(Some(at(10, 0, 0)), reference));
        assert!(is_online(Some(at(10, 0, 29)), reference));
        assert!(!is_online(Some(at(9, 59, 59)), reference));
        assert!(!is_online(None, reference));
    }
}
