use std::collections::{BTreeMap, HashMap};

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use uuid::Uuid;

use crate::enums::DecisionStatus;
use crate::models::{Decision, DecisionOption, Document, NewDecision, NewVote, Participant, Vote};
use crate::notify::{EventPublisher, Update};
use crate::schema::{decisions, documents, votes};
use crate::views::{decision_json, to_iso};

use super::{now, ServiceError, ServiceResult};

pub const LOCKED_MESSAGE: &str = "Cette décision est verrouillée.";
pub const LOCKED_VOTE_MESSAGE: &str =
    "Cette décision est verrouillée et ne peut plus recevoir de votes.";

#[derive(Debug, Clone)]
pub struct OptionInput {
    pub label: String,
    pub description: Option<String>,
}

/// Votes per option. Every option appears, votes for unknown options are
/// ignored.
pub fn tally_votes(options: &[DecisionOption], votes: &[Vote]) -> BTreeMap<Uuid, i64> {
    let mut stats: BTreeMap<Uuid, i64> = options.iter().map(|option| (option.id, 0)).collect();
    for vote in votes {
        if let Some(count) = stats.get_mut(&vote.option_id) {
            *count += 1;
        }
    }
    stats
}

/// A locked decision only accepts being postponed.
pub fn check_status_change(is_locked: bool, target: DecisionStatus) -> ServiceResult<()> {
    if is_locked && target != DecisionStatus::Postponed {
        return Err(ServiceError::Locked(LOCKED_MESSAGE.to_string()));
    }
    Ok(())
}

fn ensure_unlocked(decision: &Decision, message: &str) -> ServiceResult<()> {
    if decision.is_locked {
        return Err(ServiceError::Locked(message.to_string()));
    }
    Ok(())
}

pub fn find_decision(conn: &mut PgConnection, decision_id: Uuid) -> ServiceResult<Decision> {
    decisions::table
        .find(decision_id)
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Décision non trouvée"))
}

pub fn load_votes(conn: &mut PgConnection, decision_id: Uuid) -> ServiceResult<Vec<Vote>> {
    Ok(votes::table
        .filter(votes::decision_id.eq(decision_id))
        .order(votes::created_at.asc())
        .load(conn)?)
}

pub fn vote_stats(conn: &mut PgConnection, decision: &Decision) -> ServiceResult<BTreeMap<Uuid, i64>> {
    let decision_votes = load_votes(conn, decision.id)?;
    Ok(tally_votes(&decision.option_list(), &decision_votes))
}

pub fn create_decision(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    session_id: Uuid,
    title: &str,
    options: Vec<OptionInput>,
    description: Option<String>,
    linked_document_id: Option<Uuid>,
) -> ServiceResult<Decision> {
    if title.trim().is_empty() {
        return Err(ServiceError::Invalid("Le titre est requis".into()));
    }

    let options: Vec<DecisionOption> = options
        .into_iter()
        .map(|option| DecisionOption {
            id: Uuid::new_v4(),
            label: option.label,
            description: option.description,
        })
        .collect();
    let options_value =
        serde_json::to_value(&options).map_err(|err| ServiceError::Invalid(err.to_string()))?;

    let timestamp = now();
    let new_decision = NewDecision {
        id: Uuid::new_v4(),
        session_id,
        linked_document_id,
        title: title.trim().to_string(),
        description,
        status: DecisionStatus::default().as_str().to_string(),
        options: options_value,
        is_locked: false,
        created_at: timestamp,
        updated_at: timestamp,
    };

    diesel::insert_into(decisions::table)
        .values(&new_decision)
        .execute(conn)?;

    let decision = find_decision(conn, new_decision.id)?;
    tracing::info!(
        session_id = %session_id,
        decision_id = %decision.id,
        options = options.len(),
        "decision created"
    );
    publisher.publish(Update::decision_created(
        session_id,
        decision.id,
        &decision.title,
        decision.linked_document_id,
    ));
    Ok(decision)
}

/// Re-reads the decision under a row lock so a concurrent validation is seen.
fn lock_decision(conn: &mut PgConnection, decision_id: Uuid) -> ServiceResult<Decision> {
    decisions::table
        .find(decision_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("Décision non trouvée"))
}

/// Records or replaces the participant's vote.
pub fn vote(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision: &Decision,
    participant: &Participant,
    option_id: Uuid,
    comment: Option<String>,
) -> ServiceResult<Vote> {
    let (vote, stats) = conn.transaction::<_, ServiceError, _>(|conn| {
        let current = lock_decision(conn, decision.id)?;
        ensure_unlocked(&current, LOCKED_VOTE_MESSAGE)?;
        if !current.has_option(option_id) {
            return Err(ServiceError::Invalid("Option invalide".into()));
        }

        let existing: Option<Vote> = votes::table
            .filter(votes::decision_id.eq(current.id))
            .filter(votes::participant_id.eq(participant.id))
            .first(conn)
            .optional()?;

        let vote_id = match existing {
            Some(existing) => {
                diesel::update(votes::table.find(existing.id))
                    .set((votes::option_id.eq(option_id), votes::comment.eq(&comment)))
                    .execute(conn)?;
                existing.id
            }
            None => {
                let new_vote = NewVote {
                    id: Uuid::new_v4(),
                    decision_id: current.id,
                    participant_id: participant.id,
                    option_id,
                    comment,
                    created_at: now(),
                };
                // A concurrent first vote from the same participant trips the
                // unique index and surfaces as a conflict.
                diesel::insert_into(votes::table)
                    .values(&new_vote)
                    .execute(conn)?;
                new_vote.id
            }
        };

        let vote: Vote = votes::table.find(vote_id).first(conn)?;
        Ok((vote, vote_stats(conn, &current)?))
    })?;

    tracing::info!(
        decision_id = %decision.id,
        participant_id = %participant.id,
        option_id = %option_id,
        "vote recorded"
    );
    publisher.publish(Update::vote_received(decision.session_id, decision.id, &stats));
    Ok(vote)
}

pub fn remove_vote(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision: &Decision,
    participant_id: Uuid,
) -> ServiceResult<()> {
    let stats = conn.transaction::<_, ServiceError, _>(|conn| {
        let current = lock_decision(conn, decision.id)?;
        ensure_unlocked(&current, LOCKED_MESSAGE)?;

        diesel::delete(
            votes::table
                .filter(votes::decision_id.eq(current.id))
                .filter(votes::participant_id.eq(participant_id)),
        )
        .execute(conn)?;

        vote_stats(conn, &current)
    })?;

    publisher.publish(Update::vote_received(decision.session_id, decision.id, &stats));
    Ok(())
}

pub fn update_decision_status(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision: &Decision,
    status: DecisionStatus,
) -> ServiceResult<Decision> {
    check_status_change(decision.is_locked, status)?;

    diesel::update(decisions::table.find(decision.id))
        .set((
            decisions::status.eq(status.as_str()),
            decisions::updated_at.eq(now()),
        ))
        .execute(conn)?;

    publish_status_change(conn, publisher, decision.id)
}

/// Selects the winning option and locks the decision.
pub fn validate_decision(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision: &Decision,
    selected_option_id: Uuid,
) -> ServiceResult<Decision> {
    check_status_change(decision.is_locked, DecisionStatus::Valid)?;
    if !decision.has_option(selected_option_id) {
        return Err(ServiceError::Invalid("Option invalide".into()));
    }

    diesel::update(decisions::table.find(decision.id))
        .set((
            decisions::selected_option_id.eq(Some(selected_option_id)),
            decisions::status.eq(DecisionStatus::Valid.as_str()),
            decisions::is_locked.eq(true),
            decisions::updated_at.eq(now()),
        ))
        .execute(conn)?;

    tracing::info!(
        decision_id = %decision.id,
        option_id = %selected_option_id,
        "decision validated"
    );
    publish_status_change(conn, publisher, decision.id)
}

/// Always allowed; unlocks the decision.
pub fn postpone_decision(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision: &Decision,
) -> ServiceResult<Decision> {
    diesel::update(decisions::table.find(decision.id))
        .set((
            decisions::status.eq(DecisionStatus::Postponed.as_str()),
            decisions::is_locked.eq(false),
            decisions::updated_at.eq(now()),
        ))
        .execute(conn)?;

    publish_status_change(conn, publisher, decision.id)
}

fn publish_status_change(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision_id: Uuid,
) -> ServiceResult<Decision> {
    let updated = find_decision(conn, decision_id)?;
    publisher.publish(Update::decision_status_changed(
        updated.session_id,
        decision_json(conn, &updated)?,
    ));
    Ok(updated)
}

pub fn delete_decision(
    conn: &mut PgConnection,
    publisher: &dyn EventPublisher,
    decision: &Decision,
) -> ServiceResult<()> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        diesel::delete(votes::table.filter(votes::decision_id.eq(decision.id))).execute(conn)?;
        diesel::delete(decisions::table.find(decision.id)).execute(conn)?;
        Ok(())
    })?;

    tracing::info!(decision_id = %decision.id, "decision deleted");
    publisher.publish(Update::decision_deleted(
        decision.session_id,
        decision.id,
        decision.linked_document_id,
    ));
    Ok(())
}

/// Decisions of a session, newest first.
pub fn list_decisions(
    conn: &mut PgConnection,
    session_id: Uuid,
    document_id: Option<Uuid>,
    status: Option<DecisionStatus>,
) -> ServiceResult<Vec<Decision>> {
    let mut query = decisions::table
        .filter(decisions::session_id.eq(session_id))
        .into_boxed();
    if let Some(document_id) = document_id {
        query = query.filter(decisions::linked_document_id.eq(document_id));
    }
    if let Some(status) = status {
        query = query.filter(decisions::status.eq(status.as_str()));
    }
    Ok(query.order(decisions::created_at.desc()).load(conn)?)
}

pub fn count_pending(conn: &mut PgConnection, session_id: Uuid) -> ServiceResult<i64> {
    Ok(decisions::table
        .filter(decisions::session_id.eq(session_id))
        .filter(decisions::status.ne_all([
            DecisionStatus::Valid.as_str(),
            DecisionStatus::Postponed.as_str(),
        ]))
        .select(count_star())
        .first(conn)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRef {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Arbitration {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub selected_option: Option<DecisionOption>,
    pub document: Option<DocumentRef>,
    pub validated_at: String,
    pub vote_count: i64,
}

/// Validated decisions, most recently validated first.
pub fn arbitrations(conn: &mut PgConnection, session_id: Uuid) -> ServiceResult<Vec<Arbitration>> {
    let validated: Vec<Decision> = decisions::table
        .filter(decisions::session_id.eq(session_id))
        .filter(decisions::status.eq(DecisionStatus::Valid.as_str()))
        .order(decisions::updated_at.desc())
        .load(conn)?;

    let ids: Vec<Uuid> = validated.iter().map(|d| d.id).collect();
    let vote_counts: HashMap<Uuid, i64> = votes::table
        .filter(votes::decision_id.eq_any(&ids))
        .group_by(votes::decision_id)
        .select((votes::decision_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();

    let document_ids: Vec<Uuid> = validated.iter().filter_map(|d| d.linked_document_id).collect();
    let linked: HashMap<Uuid, Document> = documents::table
        .filter(documents::id.eq_any(&document_ids))
        .load::<Document>(conn)?
        .into_iter()
        .map(|doc| (doc.id, doc))
        .collect();

    Ok(validated
        .into_iter()
        .map(|decision| {
            let selected_option = decision.selected_option_id.and_then(|selected| {
                decision
                    .option_list()
                    .into_iter()
                    .find(|option| option.id == selected)
            });
            let document = decision
                .linked_document_id
                .and_then(|id| linked.get(&id))
                .map(|doc| DocumentRef {
                    id: doc.id,
                    title: doc.title.clone(),
                    slug: doc.slug.clone(),
                });
            Arbitration {
                id: decision.id,
                vote_count: *vote_counts.get(&decision.id).unwrap_or(&0),
                title: decision.title,
                description: decision.description,
                selected_option,
                document,
                validated_at: to_iso(decision.updated_at),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn option(label: &str) -> DecisionOption {
        DecisionOption {
            id: Uuid::new_v4(),
            label: label.into(),
            description: None,
        }
    }

    fn vote_for(option_id: Uuid) -> Vote {
        Vote {
            id: Uuid::new_v4(),
            decision_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            option_id,
            comment: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn tally_lists_every_option_even_without_votes() {
        let options = vec![option("Oui"), option("Non")];
        let stats = tally_votes(&options, &[]);
        assert_eq!(stats.len(), 2);
        assert!(stats.values().all(|count| *count == 0));
    }

    #[test]
    fn tally_counts_votes_and_ignores_unknown_options() {
        let options = vec![option("A"), option("B")];
        let votes = vec![
            vote_for(options[0].id),
            vote_for(options[0].id),
            vote_for(options[1].id),
            vote_for(Uuid::new_v4()),
        ];
        let stats = tally_votes(&options, &votes);
        assert_eq!(stats[&options[0].id], 2);
        assert_eq!(stats[&options[1].id], 1);
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn locked_decisions_only_accept_postpone() {
        assert!(check_status_change(false, DecisionStatus::Consensus).is_ok());
        assert!(check_status_change(true, DecisionStatus::Postponed).is_ok());
        assert!(matches!(
            check_status_change(true, DecisionStatus::InDiscussion),
            Err(ServiceError::Locked(_))
        ));
        assert!(matches!(
            check_status_change(true, DecisionStatus::Valid),
            Err(ServiceError::Locked(_))
        ));
    }
}
