#![allow(dead_code)]

use scorenet::prelude::*;
use std::any::Any;
use std::cell::{Cell, RefCell};

#[derive(Debug)]
pub struct Employee {
    pub id: i64,
    pub dept: String,
    pub skills: RefCell<Vec<String>>,
}

impl Employee {
    pub fn new(id: i64, dept: &str) -> Rc<Self> {
        Rc::new(Self {
            id,
            dept: dept.to_string(),
            skills: RefCell::new(Vec::new()),
        })
    }

    pub fn with_skills(id: i64, dept: &str, skills: &[&str]) -> Rc<Self> {
        let employee = Self::new(id, dept);
        *employee.skills.borrow_mut() = skills.iter().map(|s| s.to_string()).collect();
        employee
    }
}

impl Fact for Employee {
    fn fact_id(&self) -> i64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct Shift {
    pub id: i64,
    pub dept: RefCell<String>,
    pub start: u32,
}

impl Shift {
    pub fn new(id: i64, dept: &str, start: u32) -> Rc<Self> {
        Rc::new(Self {
            id,
            dept: RefCell::new(dept.to_string()),
            start,
        })
    }

    pub fn dept(&self) -> String {
        self.dept.borrow().clone()
    }
}

impl Fact for Shift {
    fn fact_id(&self) -> i64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct Room {
    pub id: i64,
}

impl Fact for Room {
    fn fact_id(&self) -> i64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct Booking {
    pub id: i64,
    pub room: Cell<i64>,
}

impl Booking {
    pub fn new(id: i64, room: i64) -> Rc<Self> {
        Rc::new(Self {
            id,
            room: Cell::new(room),
        })
    }
}

impl Fact for Booking {
    fn fact_id(&self) -> i64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Mutable fact used by the property tests.
#[derive(Debug)]
pub struct Task {
    pub id: i64,
    pub group: Cell<i64>,
    pub value: Cell<i64>,
}

impl Task {
    pub fn new(id: i64, group: i64, value: i64) -> Rc<Self> {
        Rc::new(Self {
            id,
            group: Cell::new(group),
            value: Cell::new(value),
        })
    }
}

impl Fact for Task {
    fn fact_id(&self) -> i64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct Marker {
    pub id: i64,
    pub group: Cell<i64>,
}

impl Fact for Marker {
    fn fact_id(&self) -> i64 {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn employee(t: &AnyTuple, index: usize) -> &Employee {
    t.get::<Employee>(index).expect("employee fact")
}

pub fn shift(t: &AnyTuple, index: usize) -> &Shift {
    t.get::<Shift>(index).expect("shift fact")
}

pub fn task(t: &AnyTuple, index: usize) -> &Task {
    t.get::<Task>(index).expect("task fact")
}

/// Shifts per department, weighted by the count.
pub fn shifts_per_department() -> scorenet::ConstraintDefinition<SimpleScore> {
    Stream::for_each::<Employee>()
        .join(
            &Stream::for_each::<Shift>(),
            Joiners::new().equal(|t| employee(t, 0).dept.clone(), |t| shift(t, 0).dept()),
        )
        .group_by_key(
            |t| Rc::new(employee(t, 0).dept.clone()) as Rc<dyn Fact>,
            Collectors::count(),
        )
        .penalize_weighted("Shifts per department", SimpleScore::new(1.0), |t| {
            t.get::<usize>(1).map_or(0.0, |count| *count as f64)
        })
}

/// Rooms nobody booked.
pub fn unbooked_rooms() -> scorenet::ConstraintDefinition<SimpleScore> {
    Stream::for_each::<Room>()
        .if_not_exists(
            &Stream::for_each::<Booking>(),
            Joiners::new().equal(
                |t| t.get::<Room>(0).map_or(-1, |room| room.id),
                |t| t.get::<Booking>(0).map_or(-1, |booking| booking.room.get()),
            ),
        )
        .penalize("Unbooked room", SimpleScore::new(1.0))
}
