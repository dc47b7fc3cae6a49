// src/pedigree.rs

//! Theoretical kinship from declared parent-offspring relationships.

use crate::error::{KinshipError, Result};
use crate::matrix::KinshipMatrix;
use log::{debug, info};
use std::collections::HashMap;

/// One individual of a pedigree. Parents are indices into the owning [`Pedigree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub family: String,
    pub id: String,
    pub father: Option<usize>,
    pub mother: Option<usize>,
}

impl Person {
    pub fn is_founder(&self) -> bool {
        self.father.is_none() && self.mother.is_none()
    }

    fn parents(&self) -> impl Iterator<Item = usize> {
        self.father.into_iter().chain(self.mother)
    }
}

/// A collection of people with parent links. Must be acyclic.
#[derive(Clone, Debug, Default)]
pub struct Pedigree {
    people: Vec<Person>,
}

fn is_unknown_parent(id: &str) -> bool {
    id.is_empty() || id == "0"
}

impl Pedigree {
    /// Builds a pedigree from index-linked people, checking that every parent index exists.
    pub fn from_people(people: Vec<Person>) -> Result<Self> {
        let n = people.len();
        for (idx, person) in people.iter().enumerate() {
            for parent in person.parents() {
                if parent >= n {
                    return Err(KinshipError::invalid_pedigree(format!(
                        "person {} ({}) references parent index {} but the pedigree has {} people",
                        idx, person.id, parent, n
                    )));
                }
            }
        }
        Ok(Self { people })
    }

    /// Builds a pedigree from `(family, person, father, mother)` records.
    ///
    /// Parent ids are resolved within the same family; `"0"` or an empty string means
    /// the parent is unknown. Records may appear in any order.
    pub fn from_records<I, S>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S, S, S)>,
        S: AsRef<str>,
    {
        let records: Vec<(S, S, S, S)> = records.into_iter().collect();
        let mut index: HashMap<(String, String), usize> = HashMap::with_capacity(records.len());
        for (idx, (family, person, _, _)) in records.iter().enumerate() {
            let key = (family.as_ref().to_string(), person.as_ref().to_string());
            if index.insert(key, idx).is_some() {
                return Err(KinshipError::invalid_pedigree(format!(
                    "duplicate person {} in family {}",
                    person.as_ref(),
                    family.as_ref()
                )));
            }
        }

        let resolve = |family: &str, parent: &str, child: &str| -> Result<Option<usize>> {
            if is_unknown_parent(parent) {
                return Ok(None);
            }
            let key = (family.to_string(), parent.to_string());
            index.get(&key).copied().map(Some).ok_or_else(|| {
                KinshipError::invalid_pedigree(format!(
                    "parent {} of {} is not listed in family {}",
                    parent, child, family
                ))
            })
        };

        let mut people = Vec::with_capacity(records.len());
        for (family, person, father, mother) in records.iter() {
            let (family, person) = (family.as_ref(), person.as_ref());
            people.push(Person {
                family: family.to_string(),
                id: person.to_string(),
                father: resolve(family, father.as_ref(), person)?,
                mother: resolve(family, mother.as_ref(), person)?,
            });
        }
        Self::from_people(people)
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn family_names(&self) -> Vec<String> {
        self.people.iter().map(|p| p.family.clone()).collect()
    }

    pub fn person_names(&self) -> Vec<String> {
        self.people.iter().map(|p| p.id.clone()).collect()
    }

    /// Generation of every person: founders are 0, everyone else is one more
    /// than their deepest parent. Fails on a cycle.
    pub fn generations(&self) -> Result<Vec<usize>> {
        let n = self.people.len();
        let mut generation: Vec<Option<usize>> = vec![None; n];
        let mut on_stack = vec![false; n];

        for start in 0..n {
            if generation[start].is_some() {
                continue;
            }
            let mut stack = vec![start];
            while let Some(&current) = stack.last() {
                on_stack[current] = true;
                let mut depth = 0;
                let mut unresolved = None;
                for parent in self.people[current].parents() {
                    match generation[parent] {
                        Some(g) => depth = depth.max(g + 1),
                        None if on_stack[parent] => {
                            return Err(KinshipError::invalid_pedigree(format!(
                                "cycle detected through person {} ({})",
                                parent, self.people[parent].id
                            )));
                        }
                        None => {
                            unresolved = Some(parent);
                            break;
                        }
                    }
                }
                match unresolved {
                    Some(parent) => stack.push(parent),
                    None => {
                        generation[current] = Some(depth);
                        on_stack[current] = false;
                        stack.pop();
                    }
                }
            }
        }
        Ok(generation.into_iter().map(|g| g.unwrap_or(0)).collect())
    }

    /// Order in which both parents of every non-founder come before the person:
    /// sorted by generation, ties kept in input order.
    pub fn iteration_order(&self) -> Result<Vec<usize>> {
        let generations = self.generations()?;
        let mut order: Vec<usize> = (0..self.people.len()).collect();
        order.sort_by_key(|&idx| generations[idx]);
        Ok(order)
    }
}

/// Classical kinship coefficients for every pair in the pedigree.
///
/// Founders have self-kinship 0.5 and are unrelated to everyone processed
/// before them. For a non-founder `i` and an earlier `j`,
/// `K(i, j) = (K(father, j) + K(mother, j)) / 2`, and
/// `K(i, i) = 0.5 + 0.5 * K(father, mother)`. An unknown parent counts as an
/// unrelated founder.
pub fn kinship_from_pedigree(pedigree: &Pedigree) -> Result<KinshipMatrix> {
    let n = pedigree.len();
    let order = pedigree.iteration_order()?;
    info!("Constructing pedigree kinship for {} people.", n);

    let mut k = KinshipMatrix::zeros(n);
    for (pos, &i) in order.iter().enumerate() {
        let person = &pedigree.people[i];
        for &j in &order[..pos] {
            let via_father = person.father.map_or(0.0, |f| k[(f, j)]);
            let via_mother = person.mother.map_or(0.0, |m| k[(m, j)]);
            let value = 0.5 * (via_father + via_mother);
            k[(i, j)] = value;
            k[(j, i)] = value;
        }
        let parents_kinship = match (person.father, person.mother) {
            (Some(f), Some(m)) => k[(f, m)],
            _ => 0.0,
        };
        k[(i, i)] = 0.5 + 0.5 * parents_kinship;
    }
    debug!("Pedigree kinship complete; trace = {}.", k.trace());
    Ok(k)
}
