use chrono::{DateTime, Duration, Utc};
use tripdesk_core::{Passenger, PassengerData, TravelerMix, TravelerType};
use uuid::Uuid;

use crate::error::{ExpiryKind, ExpiryNotice, ValidationError};
use crate::validation;

const TRAVELER_TYPES: [TravelerType; 3] = [TravelerType::Adult, TravelerType::Child, TravelerType::HeldInfant];

/// Result of removing a passenger. `issues` lists infants whose associated
/// adult was the removed passenger; the user has to reassign them.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalOutcome {
    pub removed: Passenger,
    pub issues: Vec<ValidationError>,
}

/// Passengers entered for the current booking attempt.
/// Kept only for a retention window that restarts on every change.
#[derive(Debug, Clone)]
pub struct PassengerRoster {
    passengers: Vec<Passenger>,
    retention: Duration,
    retention_started_at: Option<DateTime<Utc>>,
}

impl PassengerRoster {
    pub fn new(retention: Duration) -> Self {
        Self {
            passengers: Vec::new(),
            retention,
            retention_started_at: None,
        }
    }

    pub fn passengers(&self) -> &[Passenger] {
        &self.passengers
    }

    pub fn get(&self, id: &Uuid) -> Option<&Passenger> {
        self.passengers.iter().find(|p| p.id == *id)
    }

    pub fn len(&self) -> usize {
        self.passengers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passengers.is_empty()
    }

    /// Advisory age check for the form; see [`validation::validate`]
    pub fn validate(data: &PassengerData, traveler_type: TravelerType, now: DateTime<Utc>) -> Result<(), ValidationError> {
        validation::validate(data, traveler_type, now.date_naive())
    }

    /// Append a passenger. `mix` is the traveler quota of the selected offer.
    pub fn add(&mut self, data: PassengerData, mix: &TravelerMix, now: DateTime<Utc>) -> Result<&Passenger, ValidationError> {
        let capacity = mix.total();
        if self.passengers.len() >= capacity {
            return Err(ValidationError::RosterFull { capacity });
        }

        validation::validate_for_submission(&data, now.date_naive())?;
        self.check_type_quota(data.traveler_type, mix, None)?;
        self.check_association(&data, None)?;

        let passenger = Passenger::new(data, now);
        tracing::debug!("Passenger {} added as {}", passenger.id, passenger.traveler_type());
        self.passengers.push(passenger);
        self.touch(now);

        let last = self.passengers.len() - 1;
        Ok(&self.passengers[last])
    }

    /// Replace a passenger's details in place; id and position are kept
    pub fn update(&mut self, id: Uuid, data: PassengerData, mix: &TravelerMix, now: DateTime<Utc>) -> Result<&Passenger, ValidationError> {
        let index = self.index_of(&id)?;

        validation::validate_for_submission(&data, now.date_naive())?;
        if data.traveler_type != TravelerType::Adult {
            if let Some(infant) = self.infant_held_by(&id) {
                return Err(ValidationError::AdultHoldsInfant { adult_id: id, infant_id: infant.id });
            }
        }
        self.check_type_quota(data.traveler_type, mix, Some(index))?;
        self.check_association(&data, Some(index))?;

        self.passengers[index].replace(data, now);
        self.touch(now);
        Ok(&self.passengers[index])
    }

    /// Remove one passenger. Infants that pointed at the removed adult lose
    /// the association and are reported back as validation issues.
    pub fn remove(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<RemovalOutcome, ValidationError> {
        let index = self.index_of(&id)?;
        let removed = self.passengers.remove(index);

        let mut issues = Vec::new();
        for infant in self.passengers.iter_mut() {
            if infant.data.associated_adult_id == Some(id) {
                infant.data.associated_adult_id = None;
                infant.updated_at = now;
                issues.push(ValidationError::OrphanedInfant { infant_id: infant.id, adult_id: id });
            }
        }

        if self.passengers.is_empty() {
            self.retention_started_at = None;
        } else {
            self.touch(now);
        }

        if !issues.is_empty() {
            tracing::warn!("Removing passenger {} orphaned {} infant(s)", id, issues.len());
        }
        Ok(RemovalOutcome { removed, issues })
    }

    /// Drop every passenger. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.passengers.len();
        self.passengers.clear();
        self.retention_started_at = None;
        removed
    }

    /// Put back cached passengers with their original retention start
    pub fn restore(&mut self, passengers: Vec<Passenger>, retention_started_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<ExpiryNotice> {
        self.passengers = passengers;
        self.retention_started_at = if self.passengers.is_empty() {
            None
        } else {
            Some(retention_started_at)
        };
        self.clear_if_expired(now)
    }

    pub fn retention_started_at(&self) -> Option<DateTime<Utc>> {
        self.retention_started_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.retention_started_at.map(|at| at + self.retention)
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|expires_at| (expires_at - now).max(Duration::zero()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.time_remaining(now), Some(remaining) if remaining <= Duration::zero())
    }

    /// Called on every tick. Clears the whole roster once retention elapses.
    pub fn clear_if_expired(&mut self, now: DateTime<Utc>) -> Option<ExpiryNotice> {
        if !self.is_expired(now) {
            return None;
        }

        let expired_at = self.expires_at().unwrap_or(now);
        let removed = self.clear();
        tracing::info!("Passenger retention expired at {}; cleared {} passenger(s)", expired_at, removed);
        Some(ExpiryNotice::new(ExpiryKind::PassengerRetention, expired_at))
    }

    pub fn count_of(&self, traveler_type: TravelerType) -> usize {
        self.passengers
            .iter()
            .filter(|p| p.traveler_type() == traveler_type)
            .count()
    }

    /// Whether the entered passengers still fit an offer's traveler mix.
    /// Used when the offer changes under an existing roster.
    pub fn check_fits(&self, mix: &TravelerMix) -> Result<(), ValidationError> {
        for traveler_type in TRAVELER_TYPES {
            let entered = self.count_of(traveler_type);
            let allowed = mix.allowed(traveler_type);
            if entered > allowed {
                return Err(ValidationError::RosterExceedsOffer { traveler_type, entered, allowed });
            }
        }
        Ok(())
    }

    /// Submission-time check of the whole roster: the traveler types match
    /// the offer exactly, every passenger still passes the mandatory checks
    /// and every infant has a valid adult.
    pub fn check_ready(&self, mix: &TravelerMix, now: DateTime<Utc>) -> Result<(), ValidationError> {
        for traveler_type in TRAVELER_TYPES {
            let entered = self.count_of(traveler_type);
            let expected = mix.allowed(traveler_type);
            if entered != expected {
                return Err(ValidationError::TravelerMixMismatch { traveler_type, expected, entered });
            }
        }

        let today = now.date_naive();
        for (index, passenger) in self.passengers.iter().enumerate() {
            validation::validate_for_submission(&passenger.data, today)?;

            if passenger.traveler_type() == TravelerType::HeldInfant && passenger.associated_adult_id().is_none() {
                return Err(ValidationError::MissingAssociatedAdult { infant_id: Some(passenger.id) });
            }
            self.check_association(&passenger.data, Some(index))?;
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.retention_started_at = Some(now);
    }

    fn index_of(&self, id: &Uuid) -> Result<usize, ValidationError> {
        self.passengers
            .iter()
            .position(|p| p.id == *id)
            .ok_or(ValidationError::PassengerNotFound(*id))
    }

    fn infant_held_by(&self, adult_id: &Uuid) -> Option<&Passenger> {
        self.passengers
            .iter()
            .find(|p| p.associated_adult_id() == Some(*adult_id))
    }

    fn check_type_quota(&self, traveler_type: TravelerType, mix: &TravelerMix, skip: Option<usize>) -> Result<(), ValidationError> {
        let allowed = mix.allowed(traveler_type);
        let used = self
            .passengers
            .iter()
            .enumerate()
            .filter(|(i, p)| Some(*i) != skip && p.traveler_type() == traveler_type)
            .count();

        if used >= allowed {
            return Err(ValidationError::TravelerTypeFull { traveler_type, allowed });
        }
        Ok(())
    }

    /// `own_index` is the passenger's position when it is already in the
    /// roster; a new passenger is appended, so any adult is earlier.
    fn check_association(&self, data: &PassengerData, own_index: Option<usize>) -> Result<(), ValidationError> {
        let own_id = own_index.map(|i| self.passengers[i].id);

        if data.traveler_type != TravelerType::HeldInfant {
            if data.associated_adult_id.is_some() {
                return Err(ValidationError::UnexpectedAssociatedAdult);
            }
            return Ok(());
        }

        let adult_id = data
            .associated_adult_id
            .ok_or(ValidationError::MissingAssociatedAdult { infant_id: own_id })?;
        let adult_index = self.index_of(&adult_id).map_err(|_| ValidationError::AssociatedAdultNotFound(adult_id))?;

        if self.passengers[adult_index].traveler_type() != TravelerType::Adult {
            return Err(ValidationError::AssociatedPassengerNotAdult(adult_id));
        }
        if let Some(own) = own_index {
            if adult_index >= own {
                return Err(ValidationError::AssociatedAdultNotEarlier(adult_id));
            }
        }

        let taken = self
            .passengers
            .iter()
            .any(|p| Some(p.id) != own_id && p.associated_adult_id() == Some(adult_id));
        if taken {
            return Err(ValidationError::AdultAlreadyAccompanying(adult_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{adult, born_years_ago, passenger};

    fn mix(adults: usize, children: usize, held_infants: usize) -> TravelerMix {
        TravelerMix { adults, children, held_infants }
    }

    fn infant_of(adult_id: Uuid) -> PassengerData {
        let mut data = passenger("Ivy", TravelerType::HeldInfant, &born_years_ago(1));
        data.associated_adult_id = Some(adult_id);
        data
    }

    #[test]
    fn test_add_never_exceeds_required_count() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(2, 0, 0);
        let now = Utc::now();

        roster.add(adult("Ada"), &quota, now).unwrap();
        roster.add(adult("Grace"), &quota, now).unwrap();
        let err = roster.add(adult("Hedy"), &quota, now).unwrap_err();

        assert_eq!(err, ValidationError::RosterFull { capacity: 2 });
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_add_enforces_type_quota() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(1, 1, 0);
        let now = Utc::now();

        roster.add(adult("Ada"), &quota, now).unwrap();
        let err = roster.add(adult("Grace"), &quota, now).unwrap_err();
        assert_eq!(err, ValidationError::TravelerTypeFull { traveler_type: TravelerType::Adult, allowed: 1 });

        roster
            .add(passenger("Tim", TravelerType::Child, &born_years_ago(8)), &quota, now)
            .unwrap();
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_add_rejects_age_mismatch() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let data = passenger("Tim", TravelerType::Adult, &born_years_ago(8));

        let err = roster.add(data, &mix(1, 0, 0), Utc::now()).unwrap_err();
        assert!(matches!(err, ValidationError::AgeMismatch(_)));
        assert!(roster.is_empty());
        assert_eq!(roster.retention_started_at(), None);
    }

    #[test]
    fn test_infant_needs_earlier_adult() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(1, 1, 1);
        let now = Utc::now();

        let missing = passenger("Ivy", TravelerType::HeldInfant, &born_years_ago(1));
        assert_eq!(
            roster.add(missing, &quota, now).unwrap_err(),
            ValidationError::MissingAssociatedAdult { infant_id: None }
        );

        let child_id = roster
            .add(passenger("Tim", TravelerType::Child, &born_years_ago(8)), &quota, now)
            .unwrap()
            .id;
        assert_eq!(
            roster.add(infant_of(child_id), &quota, now).unwrap_err(),
            ValidationError::AssociatedPassengerNotAdult(child_id)
        );

        let stranger = Uuid::new_v4();
        assert_eq!(
            roster.add(infant_of(stranger), &quota, now).unwrap_err(),
            ValidationError::AssociatedAdultNotFound(stranger)
        );

        let adult_id = roster.add(adult("Ada"), &quota, now).unwrap().id;
        roster.add(infant_of(adult_id), &quota, now).unwrap();
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn test_one_infant_per_adult() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(1, 0, 2);
        let now = Utc::now();

        let adult_id = roster.add(adult("Ada"), &quota, now).unwrap().id;
        roster.add(infant_of(adult_id), &quota, now).unwrap();
        assert_eq!(
            roster.add(infant_of(adult_id), &quota, now).unwrap_err(),
            ValidationError::AdultAlreadyAccompanying(adult_id)
        );
    }

    #[test]
    fn test_only_infants_carry_association() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(2, 0, 0);
        let now = Utc::now();
        let first = roster.add(adult("Ada"), &quota, now).unwrap().id;

        let mut data = adult("Grace");
        data.associated_adult_id = Some(first);
        assert_eq!(roster.add(data, &quota, now).unwrap_err(), ValidationError::UnexpectedAssociatedAdult);
    }

    #[test]
    fn test_update_keeps_identity_and_position() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(2, 0, 0);
        let start = Utc::now();

        let first = roster.add(adult("Ada"), &quota, start).unwrap().id;
        roster.add(adult("Grace"), &quota, start).unwrap();

        let later = start + Duration::minutes(5);
        let updated = roster.update(first, adult("Augusta"), &quota, later).unwrap();
        assert_eq!(updated.id, first);
        assert_eq!(updated.data.first_name, "Augusta");
        assert_eq!(updated.created_at, start);
        assert_eq!(roster.passengers()[0].id, first);
        assert_eq!(roster.retention_started_at(), Some(later));
    }

    #[test]
    fn test_update_cannot_break_quota_or_infant_link() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(1, 1, 1);
        let now = Utc::now();

        let adult_id = roster.add(adult("Ada"), &quota, now).unwrap().id;
        let child_id = roster
            .add(passenger("Tim", TravelerType::Child, &born_years_ago(8)), &quota, now)
            .unwrap()
            .id;
        let infant_id = roster.add(infant_of(adult_id), &quota, now).unwrap().id;

        assert_eq!(
            roster.update(child_id, adult("Tim"), &quota, now).unwrap_err(),
            ValidationError::TravelerTypeFull { traveler_type: TravelerType::Adult, allowed: 1 }
        );

        let as_child = passenger("Ada", TravelerType::Child, &born_years_ago(8));
        assert_eq!(
            roster.update(adult_id, as_child, &quota, now).unwrap_err(),
            ValidationError::AdultHoldsInfant { adult_id, infant_id }
        );

        assert_eq!(
            roster.update(Uuid::nil(), adult("X"), &quota, now).unwrap_err(),
            ValidationError::PassengerNotFound(Uuid::nil())
        );
    }

    #[test]
    fn test_removing_referenced_adult_reports_orphan() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(1, 0, 1);
        let now = Utc::now();

        let adult_id = roster.add(adult("Ada"), &quota, now).unwrap().id;
        let infant_id = roster.add(infant_of(adult_id), &quota, now).unwrap().id;

        let outcome = roster.remove(adult_id, now).unwrap();
        assert_eq!(outcome.removed.id, adult_id);
        assert_eq!(outcome.issues, vec![ValidationError::OrphanedInfant { infant_id, adult_id }]);
        assert_eq!(roster.get(&infant_id).unwrap().associated_adult_id(), None);

        roster.add(adult("Grace"), &quota, now).unwrap();
        assert_eq!(
            roster.check_ready(&quota, now),
            Err(ValidationError::MissingAssociatedAdult { infant_id: Some(infant_id) })
        );
    }

    #[test]
    fn test_types_must_match_offer_mix() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(2, 0, 0);
        let now = Utc::now();
        roster.add(adult("Ada"), &quota, now).unwrap();
        roster.add(adult("Grace"), &quota, now).unwrap();
        assert_eq!(roster.check_ready(&quota, now), Ok(()));

        assert_eq!(
            roster.check_ready(&mix(1, 1, 0), now),
            Err(ValidationError::TravelerMixMismatch {
                traveler_type: TravelerType::Adult,
                expected: 1,
                entered: 2,
            })
        );
        assert_eq!(
            roster.check_fits(&mix(1, 2, 0)),
            Err(ValidationError::RosterExceedsOffer {
                traveler_type: TravelerType::Adult,
                entered: 2,
                allowed: 1,
            })
        );
        assert_eq!(roster.check_fits(&mix(3, 1, 0)), Ok(()));
    }

    #[test]
    fn test_retention_restarts_on_every_mutation() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let quota = mix(2, 0, 0);
        let start = Utc::now();

        let id = roster.add(adult("Ada"), &quota, start).unwrap().id;
        let t1 = start + Duration::minutes(15);
        roster.add(adult("Grace"), &quota, t1).unwrap();
        assert!(roster.clear_if_expired(start + Duration::minutes(21)).is_none());

        let t2 = t1 + Duration::minutes(10);
        roster.remove(id, t2).unwrap();
        assert_eq!(roster.expires_at(), Some(t2 + Duration::minutes(20)));

        let notice = roster.clear_if_expired(t2 + Duration::minutes(20)).unwrap();
        assert_eq!(notice.kind, ExpiryKind::PassengerRetention);
        assert!(roster.is_empty());
        assert_eq!(roster.time_remaining(t2 + Duration::minutes(20)), None);
    }

    #[test]
    fn test_restore_respects_original_start() {
        let mut roster = PassengerRoster::new(Duration::minutes(20));
        let now = Utc::now();
        let cached = vec![Passenger::new(adult("Ada"), now - Duration::minutes(30))];

        assert!(roster.restore(cached.clone(), now - Duration::minutes(10), now).is_none());
        assert_eq!(roster.len(), 1);

        assert!(roster.restore(cached, now - Duration::minutes(20), now).is_some());
        assert!(roster.is_empty());
    }
}
